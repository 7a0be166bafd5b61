mod cli;
mod config;
mod detection;
mod engine;
mod events;
mod geometry;
mod interaction;
mod logging;
mod pipeline;
mod store;
mod tracker;
mod violations;
mod zones;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
