use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use volley_testserver::{AppState, ShopConfig};

const USAGE: &str = "volley-testserver\n\nUSAGE:\n  volley-testserver [--bind 127.0.0.1:0] [--auth-fail-every N] [--reject-auth] [--delay-ms MS] [--initial-coins N]\n\nOUTPUT:\n  Prints HTTP_URL=<url> to stdout once ready.";

fn next_value<T: std::str::FromStr>(
    args: &mut impl Iterator<Item = String>,
    flag: &str,
) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    let raw = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("{flag} requires a value"))?;
    raw.parse()
        .map_err(|e| anyhow::anyhow!("invalid value for {flag}: {e}"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let mut bind_addr: SocketAddr = "127.0.0.1:0".parse()?;
    let mut config = ShopConfig::default();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--bind" => bind_addr = next_value(&mut args, "--bind")?,
            "--auth-fail-every" => {
                config.auth_failure_every = Some(next_value(&mut args, "--auth-fail-every")?);
            }
            "--reject-auth" => config.reject_auth = true,
            "--delay-ms" => {
                config.delay = Some(Duration::from_millis(next_value(&mut args, "--delay-ms")?));
            }
            "--initial-coins" => config.initial_coins = next_value(&mut args, "--initial-coins")?,
            "-h" | "--help" => {
                eprintln!("{USAGE}");
                return Ok(());
            }
            other => {
                return Err(anyhow::anyhow!("unknown argument: {other}"));
            }
        }
    }

    let listener = TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    let app = volley_testserver::router(AppState::new(config));

    println!("HTTP_URL=http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
