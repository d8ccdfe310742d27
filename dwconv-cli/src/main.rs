mod args;
mod config;
mod report;

use std::{fs, path::Path};

use anyhow::{Context, Result};
use clap::Parser;
use dwconv_core::{FusionFragment, depthwise_conv3x3_stride1x1};
use dwconv_utils::init_logging;
use log::{info, warn};

use crate::{
    args::{DwconvArgs, EmitMode},
    config::{apply_cli_overrides, load_settings},
    report::{
        INPUT_ID, OUTPUT_ID, build_plan, default_tolerance, synthetic_attributes, verify,
    },
};

fn main() -> Result<()> {
    init_logging(log::LevelFilter::Info)?;
    let args = DwconvArgs::parse();

    let mut settings = load_settings(args.config.as_deref())?;
    apply_cli_overrides(&mut settings, &args);
    settings.telemetry.apply();
    let options = settings.runtime;
    let fuse = args.fuse.activation();

    let attr = synthetic_attributes(args.input_shape.c, args.padding, args.seed)?;
    let task = depthwise_conv3x3_stride1x1(0, INPUT_ID, OUTPUT_ID, &attr, &options)?;
    info!(
        "Built {} for {} ({} storage, {} accumulation)",
        task.description,
        args.input_shape,
        options.storage_precision,
        options.accumulator_precision
    );

    match args.emit {
        EmitMode::Shader => {
            let fragment = fuse.map(FusionFragment::activation).unwrap_or_default();
            let source = task.linked_source(&options, &fragment);
            write_output(args.output.as_deref(), &source)?;
        }
        EmitMode::Plan => {
            let plan = build_plan(&task, &args.input_shape, &options, fuse)?;
            let json = serde_json::to_string_pretty(&plan).context("failed to serialize plan")?;
            write_output(args.output.as_deref(), &json)?;
        }
        EmitMode::Verify => {
            let tolerance = args
                .tolerance
                .unwrap_or_else(|| default_tolerance(options.storage_precision));
            let report = verify(
                &task,
                &attr,
                &args.input_shape,
                &options,
                fuse,
                args.seed,
                tolerance,
            )?;
            let json =
                serde_json::to_string_pretty(&report).context("failed to serialize report")?;
            write_output(args.output.as_deref(), &json)?;
            if !report.passed {
                warn!(
                    "Kernel output drifted from the reference by {} (tolerance {})",
                    report.max_abs_diff, report.tolerance
                );
                anyhow::bail!("verification failed");
            }
            info!("Verification passed (max abs diff {:e})", report.max_abs_diff);
        }
    }

    Ok(())
}

fn write_output(path: Option<&Path>, contents: &str) -> Result<()> {
    match path {
        Some(path) => {
            fs::write(path, contents)
                .with_context(|| format!("failed to write output to {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => println!("{contents}"),
    }
    Ok(())
}
