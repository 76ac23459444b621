use std::io;

use axum::Router;

pub(crate) fn run(addr: &str, app: Router) -> io::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        if let Ok(local_addr) = listener.local_addr() {
            log::info!("event=service_listening addr={local_addr}");
        }
        axum::serve(listener, app)
            .await
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
    })
}
