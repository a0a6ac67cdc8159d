#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = pg_wicket::app::parse();
    let config = pg_wicket::app::init_config(&args)?;
    pg_wicket::app::init_logging(&args, &config)?;
    pg_wicket::app::run_server(config)
}
