use anyhow::Result;
use clap::Parser;
use console::style;
use dialoguer::Input;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tiff_thumbnailer::component::thumbnail_pipeline::{
    PipelineReport, ProgressReporter, ResourceReporter,
};
use tiff_thumbnailer::config::{Config, DEFAULT_SETTINGS_FILE, save_settings};
use tiff_thumbnailer::init;
use tiff_thumbnailer::signal::setup_shutdown_signal;
use tiff_thumbnailer::tools::{scan_tiff_files, validate_directory_exists};
use tiff_thumbnailer::ThumbnailPipeline;

/// 為資料夾中的 TIFF 檔案批次產生縮圖
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// 要處理的資料夾，未指定時以互動方式詢問
    directory: Option<PathBuf>,

    /// 設定檔路徑，未指定時讀取執行檔旁的設定檔
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 寫出預設設定檔後結束
    #[arg(long)]
    init_config: bool,
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::new(),
    }
}

fn prompt_input_path() -> Result<PathBuf> {
    let path: String = Input::new()
        .with_prompt("請輸入要產生縮圖的資料夾路徑")
        .interact_text()?;
    Ok(PathBuf::from(path.trim()))
}

fn print_summary(report: &PipelineReport) {
    println!();
    println!("{}", style("=== 縮圖產生摘要 ===").cyan().bold());
    println!("  批次: {} 個", report.batches);
    println!("  成功: {} 頁", style(report.success_count()).green());
    if report.failure_count() > 0 {
        println!("  失敗: {} 頁", style(report.failure_count()).red());
        for result in report.results.iter().filter(|r| !r.success) {
            if let Some(e) = &result.error {
                println!("    {} {e}", style("✗").red());
            }
        }
    }
    if !report.skipped_files.is_empty() {
        println!(
            "  略過: {} 個檔案",
            style(report.skipped_files.len()).yellow()
        );
    }
    for e in &report.pool_errors {
        println!("  {}", style(e).yellow());
    }
    println!("  耗時: {:.2} 秒", report.elapsed.as_secs_f64());
}

fn main() -> Result<()> {
    init::init();
    let cli = Cli::parse();

    if cli.init_config {
        let path = cli
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
        save_settings(&path, &Config::default().settings)?;
        println!(
            "{}",
            style(format!("已寫入預設設定: {}", path.display())).green()
        );
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    let shutdown_signal = setup_shutdown_signal()?;

    println!("{}", style("=== TIFF 縮圖產生 ===").cyan().bold());
    let directory = match cli.directory {
        Some(directory) => directory,
        None => prompt_input_path()?,
    };
    validate_directory_exists(&directory)?;

    println!("{}", style("掃描 TIFF 檔案中...").dim());
    let files = scan_tiff_files(&directory, &config.settings.output_directory_name)?;
    if files.is_empty() {
        println!("{}", style("找不到任何 TIFF 檔案").yellow());
        return Ok(());
    }
    println!(
        "{}",
        style(format!("找到 {} 個 TIFF 檔案", files.len())).green()
    );
    info!("開始處理資料夾: {}", directory.display());

    let progress = Arc::new(ProgressReporter::new(files.len()));
    let reporter: Arc<dyn ResourceReporter> = progress.clone();
    let pipeline =
        ThumbnailPipeline::new(config.settings, shutdown_signal)?.with_reporter(reporter);
    let report = pipeline.run(files);

    if report.skipped_files.is_empty() {
        progress.finish("完成");
    } else {
        progress.abandon("已中斷");
    }
    print_summary(&report);

    if report.failure_count() > 0 {
        warn!("{} 頁縮圖產生失敗", report.failure_count());
        std::process::exit(1);
    }

    Ok(())
}
