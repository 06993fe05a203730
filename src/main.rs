use parlor::config::Config;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("invalid CHAT_PORT: {}", e.0);
            std::process::exit(2);
        }
    };

    if let Err(e) = parlor::run(config).await {
        eprintln!("server error: {e}");
        std::process::exit(1);
    }
}
