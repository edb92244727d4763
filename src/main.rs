#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;

use kcp2k_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::load()?);
    simple_logger::init_with_level(config.log.level.as_level())?;

    if config.server.listen.is_none() {
        log::warn!("no listen address configured, nothing to accept, exiting");
        return Ok(());
    }

    kcp2k_server::startup(config).await
}
