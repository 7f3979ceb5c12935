//! PDF Image Replacement CLI
//!
//! Command-line interface for listing, exporting, hiding and replacing
//! images in PDFs.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use pdf_image_replace::file_ops::load_replacement;
use pdf_image_replace::{
    build_plan, extract_image_png, list_document_images, list_page_images, submit, ImageRequest,
    MatchStrategy, PageImage, ReplaceOptions, Replacement, RunEvent, RunSummary, SharedDocument,
    TargetPages,
};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Hide or replace images in a PDF across pages
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the images painted on each page
    List {
        /// Input PDF file path
        input: PathBuf,

        /// Only list this page
        #[arg(short, long)]
        page: Option<u32>,
    },

    /// Export one image as PNG
    Extract {
        /// Input PDF file path
        input: PathBuf,

        /// Page the image is painted on
        #[arg(short, long)]
        page: u32,

        /// Resource name of the image
        #[arg(short, long)]
        name: String,

        /// Output PNG file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Hide the selected images behind transparent placeholders
    Hide(SelectionArgs),

    /// Replace the selected images with another image
    Replace {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Replacement image (PNG, JPEG or WebP)
        #[arg(long)]
        image: PathBuf,

        /// Store opaque replacements as JPEG with this quality (1-100)
        #[arg(short, long)]
        quality: Option<u8>,
    },
}

#[derive(Args, Debug)]
struct SelectionArgs {
    /// Input PDF file path
    input: PathBuf,

    /// Output PDF file path
    #[arg(short, long)]
    output: PathBuf,

    /// Page the images are selected on
    #[arg(short, long)]
    page: u32,

    /// Resource names of the selected images
    #[arg(short, long = "name", required = true)]
    names: Vec<String>,

    /// Pages to process: `all` or a list like `1,3,5-8`
    #[arg(long, default_value = "all")]
    pages: TargetPages,

    /// Match by identical pixels instead of name and size
    #[arg(long)]
    by_content: bool,

    /// Compress PDF streams (reduces file size)
    #[arg(short, long, action = clap::ArgAction::Set, default_value_t = true)]
    compress_streams: bool,

    /// Write the output even when nothing was replaced
    #[arg(long)]
    force_save: bool,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .init();
}

fn print_images(page: u32, images: &[PageImage]) {
    println!("Page {}: {} image(s)", page, images.len());
    for img in images {
        println!(
            "  {:<12} {:>5}x{:<5} {:<12} {:>2} bpc  {:<14} {:>9} bytes  obj {} {}{}",
            img.name,
            img.width,
            img.height,
            img.color_space,
            img.bits_per_component,
            img.filter,
            img.size_bytes,
            img.object_id.0,
            img.object_id.1,
            if img.has_smask { "  +smask" } else { "" }
        );
    }
}

fn list(input: PathBuf, page: Option<u32>) -> anyhow::Result<()> {
    let document = SharedDocument::load(&input).with_context(|| format!("loading {:?}", input))?;
    document.read(|doc| -> anyhow::Result<()> {
        match page {
            Some(page) => print_images(page, &list_page_images(doc, page)?),
            None => {
                for page in list_document_images(doc) {
                    print_images(page.page_number, &page.images);
                }
            }
        }
        Ok(())
    })??;
    Ok(())
}

fn extract(input: PathBuf, page: u32, name: String, output: PathBuf) -> anyhow::Result<()> {
    let document = SharedDocument::load(&input).with_context(|| format!("loading {:?}", input))?;
    let png = document.read(|doc| -> anyhow::Result<Vec<u8>> {
        let images = list_page_images(doc, page)?;
        let Some(image) = images.iter().find(|i| i.name == name) else {
            bail!("no image named {} on page {}", name, page);
        };
        Ok(extract_image_png(doc, image.object_id)?)
    })??;

    std::fs::write(&output, png).with_context(|| format!("writing {:?}", output))?;
    println!("Image saved to: {:?}", output);
    Ok(())
}

/// Run the selection in the background, printing progress until it ends
fn apply(selection: SelectionArgs, replacement: Replacement, quality: Option<u8>) -> anyhow::Result<()> {
    let options = ReplaceOptions {
        jpeg_quality: quality,
        compress_streams: selection.compress_streams,
    };
    let request = ImageRequest {
        page: selection.page,
        names: selection.names,
        pages: selection.pages,
        strategy: if selection.by_content {
            MatchStrategy::ByPixelContent
        } else {
            MatchStrategy::ByName
        },
    };

    let document = SharedDocument::load(&selection.input)
        .with_context(|| format!("loading {:?}", selection.input))?;
    let plan = document.read(|doc| build_plan(doc, &request, replacement, &options))??;

    println!(
        "Matching {} image(s) on {} page(s) by {}",
        plan.pairs().len(),
        plan.pages().len(),
        if selection.by_content { "pixel content" } else { "name and size" }
    );

    let handle = submit(plan, &document)?;
    let mut summary: Option<RunSummary> = None;
    for event in handle.events().iter() {
        match event {
            RunEvent::Progress(percent) => {
                print!("\r  {:>3}%", percent);
                std::io::stdout().flush().ok();
            }
            RunEvent::Completed(done) | RunEvent::Cancelled(done) => summary = Some(done),
            RunEvent::Failed { error, summary: partial } => {
                println!();
                return Err(error).with_context(|| {
                    format!("replacement stopped after {} page(s)", partial.pages_processed)
                });
            }
        }
    }
    println!();

    let Some(summary) = summary else {
        bail!("replacement run ended without a result");
    };
    if summary.errors > 0 {
        tracing::warn!(errors = summary.errors, "some pages or images could not be processed");
    }
    println!("Done! {} image(s) replaced, {} error(s)", summary.replaced, summary.errors);

    if summary.replaced > 0 || selection.force_save {
        document.save(&selection.output, options.compress_streams)?;
        println!("Output saved to: {:?}", selection.output);
    } else {
        println!("Nothing replaced; output not written");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::List { input, page } => list(input, page),
        Command::Extract {
            input,
            page,
            name,
            output,
        } => extract(input, page, name, output),
        Command::Hide(selection) => apply(selection, Replacement::Hide, None),
        Command::Replace {
            selection,
            image,
            quality,
        } => {
            let replacement = load_replacement(&image)?;
            apply(selection, replacement, quality)
        }
    }
}
