use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use keel_core::compiler::{self, CachingCompiler, NoCompiler, ShaderCompiler};
use keel_core::config::{self, EngineConfig};
use keel_core::context::DeviceContext;
use keel_core::pipeline::*;
use keel_core::platform::Platform;
use keel_core::shader::{ShaderDesc, ShaderLoader, ShaderStage};
use keel_core::VERSION;

#[derive(Parser, Debug)]
#[command(name = "keel", version = VERSION, about = "Vulkan device, shader and pipeline diagnostics")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Score every Vulkan device against a window surface and show the winner
    Devices {
        #[arg(long, default_value = "engine_config.json")]
        config: PathBuf,
    },
    /// Compile a GLSL file to SPIR-V with the available compiler backend
    Compile {
        /// Shader stage; guessed from the input extension when omitted
        #[arg(long, value_enum)]
        stage: Option<StageArg>,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        no_optimize: bool,
        /// Backend name (defaults to the first compiled in)
        #[arg(long)]
        backend: Option<String>,
    },
    /// Bring up a device, build a triangle pipeline and tear everything down
    Pipeline {
        #[arg(long, default_value = "engine_config.json")]
        config: PathBuf,
        #[arg(long)]
        vert: PathBuf,
        #[arg(long)]
        frag: PathBuf,
        /// Treat --vert/--frag as SPIR-V instead of GLSL
        #[arg(long)]
        spirv: bool,
        /// Keep the window open until it is closed or Escape is pressed
        #[arg(long)]
        hold: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StageArg {
    Vert,
    Frag,
    Comp,
    Geom,
    Tesc,
    Tese,
}

impl From<StageArg> for ShaderStage {
    fn from(s: StageArg) -> Self {
        match s {
            StageArg::Vert => ShaderStage::Vertex,
            StageArg::Frag => ShaderStage::Fragment,
            StageArg::Comp => ShaderStage::Compute,
            StageArg::Geom => ShaderStage::Geometry,
            StageArg::Tesc => ShaderStage::TessControl,
            StageArg::Tese => ShaderStage::TessEvaluation,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match cli.cmd {
        Command::Devices { config } => devices(&config),
        Command::Compile { stage, input, output, no_optimize, backend } => {
            compile(stage, &input, &output, !no_optimize, backend.as_deref())
        }
        Command::Pipeline { config, vert, frag, spirv, hold } => pipeline(&config, &vert, &frag, spirv, hold),
    }
}

fn load(path: &Path) -> Result<EngineConfig> {
    config::load_config(path).with_context(|| format!("loading {}", path.display()))
}

/// Anchor a path given on the command line to the working directory, so the
/// loader's config-relative base dir does not apply to it.
fn from_cwd(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).with_context(|| format!("resolving {}", path.display()))
}

fn devices(config: &Path) -> Result<()> {
    let cfg = load(config)?;
    let platform = Platform::init()?;
    let window = platform.create_window(&cfg.window)?;
    let ctx = DeviceContext::new(&cfg, window)?;

    let survey = ctx.survey()?;
    if survey.is_empty() {
        println!("No Vulkan devices found");
    }
    for (i, (info, verdict)) in survey.iter().enumerate() {
        match verdict {
            Ok(c) => println!("[{}] {} ({:?}) score={}", i, info.name, info.device_type, c.score),
            Err(reason) => println!("[{}] {} ({:?}) disqualified: {}", i, info.name, info.device_type, reason),
        }
    }
    let chosen = ctx.candidate();
    println!(
        "Selected: {} graphics_queue={} present_queue={} format={:?} extent={}x{} images={}",
        chosen.name,
        chosen.graphics_index,
        chosen.present_index,
        chosen.surface_format.format,
        chosen.extent.width,
        chosen.extent.height,
        chosen.image_count
    );
    Ok(())
}

fn compile(stage: Option<StageArg>, input: &Path, output: &Path, optimize: bool, backend: Option<&str>) -> Result<()> {
    let stage = match stage {
        Some(s) => ShaderStage::from(s),
        None => ShaderStage::from_extension(input)
            .ok_or_else(|| anyhow!("cannot guess the stage of {}; pass --stage", input.display()))?,
    };
    let loader = ShaderLoader::new(compiler::discover(backend)?);
    let words = loader.resolve(&ShaderDesc::source_path(input).optimize(optimize), stage)?;
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    std::fs::write(output, &bytes).with_context(|| format!("writing {}", output.display()))?;
    println!(
        "Compiled {} ({}) with {} -> {} ({} words)",
        input.display(),
        stage,
        loader.compiler().backend_name(),
        output.display(),
        words.len()
    );
    Ok(())
}

fn pipeline(config: &Path, vert: &Path, frag: &Path, spirv: bool, hold: bool) -> Result<()> {
    let cfg = load(config)?;
    let (vert, frag) = (from_cwd(vert)?, from_cwd(frag)?);
    let compiler: Box<dyn ShaderCompiler> = if spirv {
        Box::new(NoCompiler)
    } else {
        Box::new(CachingCompiler::new(compiler::discover(cfg.compiler.as_deref())?))
    };
    let mut loader = ShaderLoader::new(compiler);
    if let Some(base) = &cfg.base_path {
        loader = loader.with_base_dir(base);
    }
    let (vs, fs) = if spirv {
        (ShaderDesc::bytecode_path(&vert), ShaderDesc::bytecode_path(&frag))
    } else {
        (ShaderDesc::source_path(&vert), ShaderDesc::source_path(&frag))
    };

    let mut platform = Platform::init()?;
    let window = platform.create_window(&cfg.window)?;
    let ctx = DeviceContext::new(&cfg, window)?;
    println!("Device: {} ({} swapchain images)", ctx.candidate().name, ctx.images().len());

    let built = PipelineBuilder::begin(ctx.swap_target(), &loader)
        .add_vertex_input(VertexInputInfo::default())?
        .add_input_assembly(InputAssemblyInfo::default())?
        .add_viewport(ViewportInfo::default())?
        .add_vertex_shader(&vs)?
        .add_rasterizer(RasterizerInfo::default())?
        .add_multisampler(MultisampleInfo::default())?
        .add_fragment_shader(&fs)?
        .add_color_blending(ColorBlendInfo::default())?
        .add_layouts(LayoutsInfo::default())?
        .add_render_subpass(SubpassInfo::default())?
        .end()?
        .build(ctx.device())?;
    println!(
        "Created pipeline={:?} layout={:?} render_pass={:?}",
        built.pipeline(),
        built.layout(),
        built.render_pass()
    );

    if hold {
        platform.wait_for_close();
    }
    drop(built);
    drop(ctx);
    println!("Pipeline and device context destroyed.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_paths_resolve_from_the_working_directory() {
        let resolved = from_cwd(Path::new("Cargo.toml")).unwrap();
        assert!(resolved.is_absolute());
        assert_eq!(resolved, std::env::current_dir().unwrap().join("Cargo.toml").canonicalize().unwrap());

        let loader = ShaderLoader::default().with_base_dir("/somewhere/else");
        assert_eq!(loader.resolve_path(&resolved), resolved);
    }

    #[test]
    fn missing_command_line_path_is_reported() {
        let err = from_cwd(Path::new("no/such/shader.vert")).unwrap_err();
        assert!(err.to_string().contains("no/such/shader.vert"));
    }
}
