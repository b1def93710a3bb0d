use vela_api::Value;
use vela_config_hcl::HclParser;
use vela_engine::{ExecutionStats, JobConfig, TomlParser};

use crate::config::{OutputFormat, RunArgs};
use crate::error::CliError;

pub fn run(args: RunArgs) -> Result<(), CliError> {
    let job = JobConfig::load_with(&args.job, &[&TomlParser, &HclParser])?;
    tracing::info!(
        job = %args.job,
        rows = job.source.rows.len(),
        stages = job.stages.len(),
        "job loaded"
    );

    let ctx = job.context()?;
    let ds = job.build(&ctx)?;
    let limit = args.limit.unwrap_or(usize::MAX);

    match args.format {
        OutputFormat::Text => {
            print!("{}", ds.show(limit)?);
            if let Some(stats) = ds.stats() {
                print_exceptions(&stats);
            }
        }
        OutputFormat::Json => {
            let rows = ds.take(limit)?;
            let out = serde_json::json!({
                "columns": ds.columns(),
                "rows": rows.iter().map(Value::to_json).collect::<Vec<_>>(),
                "stats": ds.stats(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}

fn print_exceptions(stats: &ExecutionStats) {
    for (stage, counts) in stats.exception_counts() {
        for (kind, n) in counts {
            println!("{stage}: {n} {kind} exception(s)");
        }
    }
}
