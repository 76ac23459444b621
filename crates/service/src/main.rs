fn main() {
    env_logger::init();

    let addr = kimichat_service::service_addr_from_env();
    println!("kimichat-service listening on {addr}");
    println!("  chat:           POST http://{addr}/api/ai/chat");
    println!("  image analysis: POST http://{addr}/api/ai/analyze-multi-images");
    println!("  health:         GET  http://{addr}/api/health");
    println!("  model config:   GET  http://{addr}/api/model/config");

    if let Err(err) = kimichat_service::start_server(&addr) {
        eprintln!("service stopped: {err}");
        std::process::exit(1);
    }
}
