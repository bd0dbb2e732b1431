//! Command-line driver for the dispatch pipeline.
//!
//! Reads a kernel source file, selects the first available device, prints
//! its description, and runs one of two demos: an integer vector addition
//! (default) or a gradient render written out as a PNG (`--image`).
//! The backend is chosen via `CLRUN_BACKEND` (`host` by default).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use clap::Parser;
use clrun_device::{AccessMode, DeviceInfoKey, ImageDesc};
use clrun_runtime::{
    Binding, Buffer, CommandQueue, Context, DeviceRegistry, Extent, Image, Program, backend_from_env, fence,
    read_buffer, read_image, run_kernel, write_buffer,
};
use tracing::info;

/// Vector-add demo shape, matching the classic first-program layout.
const DEMO_LEN: usize = 128;
const DEMO_LOCAL: usize = 8;
const DEMO_TAIL: usize = 10;

/// Gradient demo shape.
const GRADIENT_WIDTH: usize = 1200;
const GRADIENT_HEIGHT: usize = 800;
const GRADIENT_LOCAL: usize = 16;

#[derive(Parser)]
#[command(name = "clrun", version, about = "Compile a kernel file and dispatch it on the first available device")]
struct Args {
    /// Path to the kernel source file.
    kernel: PathBuf,

    /// Entry point for the vector-add demo.
    #[arg(long, default_value = "vector_add")]
    entry: String,

    /// Render the gradient demo and write the result to this PNG path
    /// instead of running the vector-add demo.
    #[arg(long)]
    image: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run(Args::parse()) {
        eprintln!("fatal: {error:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let source = std::fs::read_to_string(&args.kernel)
        .with_context(|| format!("reading kernel source {}", args.kernel.display()))?;

    let backend = backend_from_env();
    info!(backend = backend.name(), "backend selected");

    let registry = DeviceRegistry::new(backend);
    let device = registry.select_first_device()?;
    println!("device:        {}", registry.device_info(device, DeviceInfoKey::Name)?);
    println!("language:      {}", registry.device_info(device, DeviceInfoKey::SourceVersion)?);
    println!("compute units: {}", registry.device_info(device, DeviceInfoKey::ComputeUnits)?);

    let context = Context::create(Arc::clone(registry.backend()), device)?;
    let queue = CommandQueue::create(&context)?;
    let program = Program::compile(&context, &source)?;

    match &args.image {
        Some(path) => render_gradient(&context, &queue, &program, path)?,
        None => vector_add_demo(&context, &queue, &program, &args.entry)?,
    }

    fence(&queue)?;
    program.release()?;
    queue.release()?;
    context.release()?;
    Ok(())
}

fn i32s_to_bytes(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// out[i] = a[i] + b[i] over `DEMO_LEN` items, printing the tail.
fn vector_add_demo(context: &Context, queue: &CommandQueue, program: &Program, entry: &str) -> Result<()> {
    let kernel = program.create_kernel(entry)?;

    let a: Vec<i32> = (0..DEMO_LEN as i32).collect();
    let b = vec![100i32; DEMO_LEN];
    let buf_a = Buffer::create(context, DEMO_LEN * 4, AccessMode::ReadOnly)?;
    let buf_b = Buffer::create(context, DEMO_LEN * 4, AccessMode::ReadOnly)?;
    let buf_out = Buffer::create(context, DEMO_LEN * 4, AccessMode::WriteOnly)?;

    write_buffer(queue, &buf_a, &i32s_to_bytes(&a))?;
    write_buffer(queue, &buf_b, &i32s_to_bytes(&b))?;
    run_kernel(
        queue,
        &kernel,
        &[Binding::Buffer(&buf_a), Binding::Buffer(&buf_b), Binding::Buffer(&buf_out)],
        Extent::One(DEMO_LEN),
        Some(Extent::One(DEMO_LOCAL)),
    )?;

    let out = read_buffer(queue, &buf_out)?;
    for i in DEMO_LEN - DEMO_TAIL..DEMO_LEN {
        let chunk = &out[i * 4..i * 4 + 4];
        let value = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        println!("out[{i}] = {value}");
    }

    buf_a.release()?;
    buf_b.release()?;
    buf_out.release()?;
    kernel.release()?;
    Ok(())
}

/// Render an RGBA gradient on the device and encode it as a PNG.
fn render_gradient(context: &Context, queue: &CommandQueue, program: &Program, path: &Path) -> Result<()> {
    let kernel = program.create_kernel("fill_gradient")?;

    let desc = ImageDesc::rgba8(GRADIENT_WIDTH, GRADIENT_HEIGHT);
    let target = Image::create(context, desc, AccessMode::WriteOnly)?;
    run_kernel(
        queue,
        &kernel,
        &[Binding::Image(&target)],
        Extent::Two(GRADIENT_WIDTH, GRADIENT_HEIGHT),
        Some(Extent::Two(GRADIENT_LOCAL, GRADIENT_LOCAL)),
    )?;

    let pixels = read_image(queue, &target)?;
    let encoded = image::RgbaImage::from_raw(GRADIENT_WIDTH as u32, GRADIENT_HEIGHT as u32, pixels)
        .ok_or_else(|| anyhow!("pixel buffer does not match image dimensions"))?;
    encoded.save(path).with_context(|| format!("writing {}", path.display()))?;
    println!("wrote {}x{} gradient to {}", GRADIENT_WIDTH, GRADIENT_HEIGHT, path.display());

    target.release()?;
    kernel.release()?;
    Ok(())
}
