//! `marcstream run` command implementation

use crate::RunArgs;
use marcstream_common::{Locator, Result};
use marcstream_engine::{Assembler, BackendSettings, PipelineOptions, SinkTarget};
use tracing::info;

fn settings(args: &RunArgs) -> Result<BackendSettings> {
    let mut settings = BackendSettings::from_env();
    if let Some(part_size) = args.part_size {
        settings.s3.part_size = part_size;
    }
    if let Some(key) = &args.key {
        settings.sftp = settings.sftp.with_key_file(key);
    }
    if let Some(var) = &args.key_env {
        settings.sftp = settings.sftp.with_key_env(var)?;
    }
    Ok(settings)
}

pub fn options(args: &RunArgs) -> Result<PipelineOptions> {
    Ok(PipelineOptions {
        from: args.from.clone(),
        to: args.to.clone(),
        map: args.map.clone(),
        params: PipelineOptions::parse_params(&args.params)?,
        count: args.count,
        skip: args.skip,
        gunzip: args.gunzip,
        tar: args.tar,
        channel_capacity: args.channel_capacity,
    })
}

/// Convert one input
pub async fn run(args: &RunArgs) -> Result<()> {
    let options = options(args)?;
    options.validate()?;

    let input = Locator::parse(&args.input)?;
    let sink = args
        .out
        .as_deref()
        .map(Locator::parse)
        .transpose()?
        .map(SinkTarget::Locator);

    let assembler = Assembler::with_builtins(settings(args)?)?;
    let outcome = assembler.run(&input, &options, sink).await?;

    info!(
        records = outcome.records,
        stopped_early = outcome.stopped_early,
        "conversion finished"
    );
    Ok(())
}
