use clap::Parser;
use splat_lib::{load, load_async, write_splat_ply, DecodeOptions, Format, SplatData};
use std::error::Error;
use std::fs;
use std::path::Path;
use std::process;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "Splat Inspector",
    version = "1.0",
    author = "Denis Avvakumov",
    about = "Loads PLY or .splat Gaussian splat files, prints their statistics and optionally reorders them"
)]
struct Cli {
    #[arg(
        short = 'i',
        long = "input",
        value_name = "INPUT",
        required = true,
        help = "Path to the input file."
    )]
    input: String,

    #[arg(
        short = 'o',
        long = "output",
        value_name = "OUTPUT",
        help = "Write the (possibly reordered) splats to this path as a float PLY file."
    )]
    output: Option<String>,

    #[arg(
        short = 'f',
        long = "format",
        value_name = "FORMAT",
        help = "Input format (ply or splat). Detected from the extension or contents when omitted."
    )]
    format: Option<Format>,

    #[arg(
        short = 'm',
        long = "morton",
        default_value = "false",
        help = "Reorder splats along a Morton curve before writing."
    )]
    morton: bool,

    #[arg(
        short = 'x',
        long = "exclude",
        value_name = "PROPERTY",
        help = "Skip decoding this PLY property. May be repeated."
    )]
    exclude: Vec<String>,

    #[arg(
        short = 'a',
        long = "async",
        default_value = "false",
        help = "Read the input through the asynchronous loader."
    )]
    async_mode: bool,
}

fn print_summary(data: &SplatData) {
    for element in data.elements() {
        let names: Vec<&str> = element.properties().iter().map(|p| p.name.as_str()).collect();
        println!(
            "Element '{}': {} records | {}",
            element.name(),
            element.count(),
            names.join(", ")
        );
    }
    println!(
        "Splats: {} | SH bands: {} | Compressed: {} | Float: {} | Storage: {} bytes",
        data.num_splats(),
        data.sh_bands(),
        data.is_compressed(),
        data.is_float(),
        data.storage_bytes()
    );

    match data.calc_aabb_pessimistic(None) {
        Some(aabb) => println!("Bounds (pessimistic): min {} max {}", aabb.min(), aabb.max()),
        None => println!("Bounds (pessimistic): n/a"),
    }
    match data.calc_aabb_exact(None) {
        Some(aabb) => println!("Bounds (exact): min {} max {}", aabb.min(), aabb.max()),
        None => println!("Bounds (exact): n/a"),
    }
    match data.calc_focal_point(None) {
        Some(focal) => println!("Focal point: {}", focal),
        None => println!("Focal point: n/a"),
    }
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let raw_data = fs::read(&cli.input).unwrap_or_else(|e| {
        eprintln!("Error reading input file {}: {}", cli.input, e);
        process::exit(1);
    });

    let format = cli.format.or_else(|| Format::from_path(Path::new(&cli.input)));
    let mode = if cli.async_mode {
        "Asynchronous"
    } else {
        "Synchronous"
    };
    println!(
        "Mode: {} | Input: {} | Format: {}",
        mode,
        cli.input,
        format.map_or_else(|| "auto".to_string(), |f| f.to_string())
    );

    let keep = |_element: &str, property: &str| !cli.exclude.iter().any(|x| x == property);
    let filter = (!cli.exclude.is_empty()).then_some(&keep as &dyn Fn(&str, &str) -> bool);
    let options = || DecodeOptions {
        filter,
        progress: None,
    };

    let start = Instant::now();
    let mut data = if cli.async_mode {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        rt.block_on(async {
            let mut reader = raw_data.as_slice();
            load_async(&mut reader, format, options()).await
        })?
    } else {
        load(&raw_data, format, options())?
    };
    tracing::info!(
        splats = data.num_splats(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Loaded {}",
        cli.input
    );

    print_summary(&data);

    if cli.morton {
        let start = Instant::now();
        data.reorder_morton()?;
        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Reordered splats into Morton order"
        );
    }

    if let Some(output) = &cli.output {
        let mut buf = Vec::new();
        write_splat_ply(&mut buf, &data)?;
        fs::write(output, &buf).unwrap_or_else(|e| {
            eprintln!("Error writing output '{}': {}", output, e);
            process::exit(1);
        });
        tracing::info!(bytes = buf.len(), "Successfully wrote to '{}'", output);
    }

    Ok(())
}
