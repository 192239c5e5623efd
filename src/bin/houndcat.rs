/* houndcat — register drivers from a config file and stream their
 * records to stdout. Mostly a debugging aid: point it at a config, watch
 * the decoded records scroll by. */

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hound::{
    ContextRequest, DataId, DataRequest, FieldFmt, FieldValue, Hound, ON_DEMAND, Record, SchedMode,
    apply_config, load_config,
};

#[derive(Parser)]
#[command(name = "houndcat", about = "Stream hound sensor records to stdout")]
struct Cli {
    /* YAML config listing the drivers to register. */
    config: PathBuf,

    /* Directory holding the schema files the config refers to. */
    #[arg(long)]
    schema_base: Option<PathBuf>,

    /* Stop after this many records (default: run until interrupted). */
    #[arg(short = 'n', long)]
    count: Option<u64>,

    /* Per-context queue capacity. */
    #[arg(long, default_value_t = 1024)]
    queue_len: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();

    let hound = Hound::new();
    let specs = load_config(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    apply_config(&hound, &specs, cli.schema_base.as_deref())
        .await
        .context("registering drivers")?;

    /* Subscribe to everything that is advertised, at each data id's
     * slowest supported rate (pull data stays on demand). */
    let advertised = hound.datadesc().await;
    anyhow::ensure!(!advertised.is_empty(), "no data advertised by any driver");

    let mut layouts: HashMap<DataId, (String, Vec<FieldFmt>)> = HashMap::new();
    let mut requests = Vec::new();
    let mut any_pull = false;
    for data in &advertised {
        let period = match data.desc.sched {
            SchedMode::Pull => {
                any_pull = true;
                ON_DEMAND
            }
            SchedMode::Push => *data.desc.periods.iter().max().unwrap_or(&0),
        };
        requests.push(DataRequest {
            id: data.desc.id,
            period,
        });
        layouts.insert(
            data.desc.id,
            (data.desc.name.clone(), data.desc.fmt.clone()),
        );
        info!(
            "requesting {} ({}) from dev {} at {} ns",
            data.desc.name, data.desc.id, data.dev_id, period
        );
    }

    let layouts = Arc::new(layouts);
    let printer = {
        let layouts = Arc::clone(&layouts);
        move |rec: &Record, seqno: u64| print_record(&layouts, rec, seqno)
    };

    let ctx = hound
        .alloc_ctx(ContextRequest {
            queue_len: cli.queue_len,
            callback: Some(Box::new(printer)),
            requests,
        })
        .await?;
    ctx.start().await?;

    let mut remaining = cli.count;
    loop {
        /* Pull-only configs make no progress inside a single blocking
         * read batch, so keep batches small. */
        let batch = if any_pull { 16 } else { 64 };
        let want = match remaining {
            Some(0) => break,
            Some(n) => batch.min(n as usize),
            None => batch,
        };
        tokio::select! {
            got = ctx.read(want) => {
                let got = got? as u64;
                if let Some(n) = remaining.as_mut() {
                    *n = n.saturating_sub(got);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
        }
    }

    ctx.stop().await?;
    Ok(())
}

fn print_record(
    layouts: &HashMap<DataId, (String, Vec<FieldFmt>)>,
    rec: &Record,
    seqno: u64,
) {
    let Some((name, fmt)) = layouts.get(&rec.data_id) else {
        return;
    };
    let mut line = format!(
        "{}.{:09} {} seq={} dev={}",
        rec.timestamp.sec, rec.timestamp.nsec, name, seqno, rec.dev_id
    );
    if fmt.is_empty() {
        line.push_str(&format!(" {} bytes", rec.size()));
    } else {
        for field in fmt {
            match field.decode(&rec.data) {
                Some(FieldValue::Float(v)) => line.push_str(&format!(" {}={v}", field.name)),
                Some(FieldValue::Double(v)) => line.push_str(&format!(" {}={v}", field.name)),
                Some(FieldValue::Int(v)) => line.push_str(&format!(" {}={v}", field.name)),
                Some(FieldValue::Uint(v)) => line.push_str(&format!(" {}={v}", field.name)),
                Some(FieldValue::Bool(v)) => line.push_str(&format!(" {}={v}", field.name)),
                Some(FieldValue::Bytes(v)) => {
                    line.push_str(&format!(" {}={} bytes", field.name, v.len()));
                }
                None => line.push_str(&format!(" {}=?", field.name)),
            }
        }
    }
    println!("{line}");
}
