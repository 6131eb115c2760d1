use tessera_api::setup;
use tessera_core::Config;

// mimalloc as the global allocator.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    let (state, router) = setup::initialize_app(config.clone()).await?;

    setup::server::start_server(&config, router, state).await?;

    Ok(())
}
