//! Log in, subscribe to a few NSE ticks and print them until Ctrl-C.
//!
//! Reads from the environment (or a `.env` file):
//! - `INTEGRATE_API_TOKEN`, `INTEGRATE_API_SECRET`
//! - `INTEGRATE_TOTP`, the current code from the authenticator app
//! - `INTEGRATE_SYMBOLS` (optional), path to `allmaster.csv` for token validation
//!
//! ```bash
//! RUST_LOG=integrate_sdk=debug cargo run --example stream_ticks
//! ```

use std::sync::Arc;

use serde_json::Value;
use tracing_subscriber::EnvFilter;

use integrate_sdk::prelude::*;

struct Printer {
    keys: Vec<SubscriptionKey>,
}

impl StreamHandler for Printer {
    fn on_login(&mut self, stream: &StreamHandle) {
        if let Err(e) = stream.subscribe(SubscriptionKind::Tick, &self.keys) {
            tracing::error!("subscribe failed: {}", e);
            stream.close_on_exception("subscribe failed");
        }
    }

    fn on_tick_update(&mut self, _stream: &StreamHandle, tick: &Value) {
        println!(
            "{} ltp={} vol={}",
            tick["tk"].as_str().unwrap_or("?"),
            tick["lp"].as_str().unwrap_or("-"),
            tick["v"].as_str().unwrap_or("-"),
        );
    }

    fn on_reconnection(&mut self, _stream: &StreamHandle, attempt: u32) {
        println!("reconnecting (attempt {attempt})");
    }

    fn on_stop_reconnection(&mut self, _stream: &StreamHandle) {
        println!("gave up reconnecting");
    }

    fn on_exception(&mut self, _stream: &StreamHandle, error: &SdkError) {
        eprintln!("stream error: {error}");
    }
}

fn env(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} must be set"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut builder = IntegrateClient::builder();
    if let Ok(path) = std::env::var("INTEGRATE_SYMBOLS") {
        builder = builder.resolver(Arc::new(SymbolMaster::from_path(path)?));
    }
    let client = builder.build()?;

    let creds = client
        .auth()
        .login(
            &env("INTEGRATE_API_TOKEN"),
            &env("INTEGRATE_API_SECRET"),
            &env("INTEGRATE_TOTP"),
        )
        .await?;
    println!("logged in as {} ({})", creds.uid, creds.actid);

    let stream = client.stream().await?;
    let handle = stream.handle();
    let printer = Printer {
        keys: vec![
            SubscriptionKey::new(Exchange::Nse, "11536"),
            SubscriptionKey::new(Exchange::Nse, "2885"),
        ],
    };

    let session = tokio::spawn(stream.run(client.connect_options(), printer));
    tokio::signal::ctrl_c().await?;
    handle.stop();
    session.await??;
    Ok(())
}
