//! Build command - resolve the catalog and build every package

use super::BuildArgs;
use convenient_rootfs::{
    ArchiveExtractor, BatchReport, BuildSettings, CatalogLoader, Dispatcher, Error,
    HttpDownloader, SystemRunner, UreqTransport, resolve_and_build,
};
use std::fs;
use std::path::Path;
use std::process::ExitCode;

/// Run the build and report the outcome.
pub fn execute(args: &BuildArgs) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut settings = BuildSettings::load(args.settings.as_deref())?;
    args.apply(&mut settings);

    println!("📋 Configuration:");
    println!("  Architecture: {}", settings.arch);
    println!("  Work dir:     {}", settings.work_dir.display());
    println!("  Downloads:    {}", settings.downloads_dir.display());
    println!("  Rootfs:       {}", settings.rootfs_dir.display());
    println!("  Jobs:         {}", settings.jobs);
    println!();

    let catalog = CatalogLoader::new().load(&args.configs)?;
    tracing::info!("Catalog holds {} packages", catalog.len());

    let runner = SystemRunner::new();
    let downloader = HttpDownloader::new(
        UreqTransport::new(settings.download_timeout()).progress(!args.no_progress),
    );
    let extractor = ArchiveExtractor::new();
    let dispatcher = Dispatcher::new(&runner, &downloader, &extractor);

    let report = match resolve_and_build(&catalog, &settings.to_context(), &dispatcher) {
        Ok(report) => report,
        Err(Error::Aborted(report)) => {
            print_summary(&report);
            write_report(&report, args.report.as_deref())?;
            println!("\n🛑 Build aborted (use --ignore-errors to continue past failures)");
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    };

    print_summary(&report);
    write_report(&report, args.report.as_deref())?;

    if report.is_success() {
        println!("\n✅ All packages built into {}", settings.rootfs_dir.display());
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn print_summary(report: &BatchReport) {
    println!("\n📊 Summary:");
    println!("  Succeeded: {}", report.succeeded().len());
    println!("  Skipped:   {}", report.skipped().len());
    println!("  Failed:    {}", report.failures().len());

    let failures = report.failures();
    if !failures.is_empty() {
        println!("\n❌ Failed packages:");
        for (name, err) in failures {
            println!("  {name}: {err}");
        }
    }
}

fn write_report(
    report: &BatchReport,
    path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(path) = path {
        fs::write(path, serde_json::to_string_pretty(report)?)?;
        println!("📝 Report written to {}", path.display());
    }
    Ok(())
}
