use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use rayon::{prelude::*, ThreadPoolBuilder};
use std::{
    fs::File,
    io::{BufWriter, Write},
    sync::Arc,
};

use strtype::{
    cli::Cli,
    genotyping::LnFactorial,
    io::{self, vcf::make_vcf_header},
    repeat::RepeatRegion,
    run, utils,
};

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = try_main(&cli) {
        eprintln!("strtype: {e:#}");
        std::process::exit(1);
    }
}

fn try_main(cli: &Cli) -> Result<()> {
    let params = cli.params();
    let sample_name = cli.get_sample_name()?;

    let mut regions = io::load_regions(&cli.regions)?;
    if regions.is_empty() {
        bail!("No usable repeat regions in {}", cli.regions);
    }

    // shared read-only across workers
    let lnfact = Arc::new(LnFactorial::new());

    ThreadPoolBuilder::new()
        .num_threads(cli.threads)
        .build_global()
        .context("Error building thread pool")?;
    info!("Launching {} thread(s) for genotyping", cli.threads);

    let chunksize = regions.len() / cli.threads + 1;
    let results: Vec<Result<()>> = regions
        .par_chunks_mut(chunksize)
        .enumerate()
        .map(|(tidx, chunk)| run(chunk, &params, &lnfact, &cli.alignment, &cli.reference, tidx))
        .collect();
    for result in results {
        result?;
    }

    // fragments are concatenated in input-region order, so output does not
    // depend on the worker count
    let prefix = utils::output_prefix(&cli.alignment, &params)?;
    let header = make_vcf_header(&sample_name);
    write_fragments(&format!("{prefix}.vcf"), Some(&header), &regions, |r| {
        &r.output.vcf
    })?;
    if params.make_calls_file {
        write_fragments(&format!("{prefix}.calls"), None, &regions, |r| {
            &r.output.calls
        })?;
    }
    if params.make_repeatseq_file {
        write_fragments(&format!("{prefix}.repeatseq"), None, &regions, |r| {
            &r.output.repeatseq
        })?;
    }

    Ok(())
}

fn write_fragments<F>(
    path: &str,
    header: Option<&str>,
    regions: &[RepeatRegion],
    select: F,
) -> Result<()>
where
    F: Fn(&RepeatRegion) -> &str,
{
    let file = File::create(path).with_context(|| format!("Could not create {path}"))?;
    let mut writer = BufWriter::new(file);
    if let Some(header) = header {
        writer.write_all(header.as_bytes())?;
    }
    for region in regions {
        writer.write_all(select(region).as_bytes())?;
    }
    writer.flush().with_context(|| format!("Error writing {path}"))?;
    info!("Wrote {path}");

    Ok(())
}
