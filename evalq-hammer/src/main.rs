use std::process;

use anyhow::Context;

use evalq_hammer::error::HammerError;
use evalq_hammer::{Options, USAGE, logging, parse_args, run};

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(e) => {
            let msg = e.to_string();
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("{USAGE}");
            process::exit(2);
        }
    };

    logging::init_tracing();

    if let Err(e) = run_main(&options).await {
        eprintln!("error: {e:#}");
        let code = match e.downcast_ref::<HammerError>() {
            Some(HammerError::Usage(_) | HammerError::Config(_)) => 2,
            _ => 1,
        };
        process::exit(code);
    }
}

async fn run_main(options: &Options) -> anyhow::Result<()> {
    if options.host_worker {
        return run::serve_worker(options)
            .await
            .context("host worker failed");
    }

    let summary = run::run_batch(options).await?;
    if options.json {
        let json = serde_json::to_string_pretty(&summary).context("serializing summary")?;
        println!("{json}");
    } else {
        println!("{summary}");
    }
    Ok(())
}
