//! 把 `shader/src` 下的 GLSL 编译为 SPIR-V，输出到 `shader/.build/{name}.spv`
//!
//! 依赖 Vulkan SDK 中的 glslc

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use rayon::prelude::*;
use vireo_crate_tools::init_log::init_log;
use vireo_crate_tools::resource::VireoPath;

/// 一个具体的编译任务
#[derive(Debug)]
struct ShaderCompileTask {
    shader_path: PathBuf,
    output_path: PathBuf,
}

impl ShaderCompileTask {
    /// 只处理 vertex 和 fragment shader
    fn new(entry: &walkdir::DirEntry, build_dir: &Path) -> Option<Self> {
        let shader_name = entry.file_name().to_str()?;
        if !(shader_name.ends_with(".vert") || shader_name.ends_with(".frag")) {
            return None;
        }
        Some(Self {
            shader_path: entry.path().to_path_buf(),
            output_path: build_dir.join(format!("{shader_name}.spv")),
        })
    }

    fn build(&self) -> anyhow::Result<()> {
        let output = std::process::Command::new("glslc")
            .args(["-g", "--target-env=vulkan1.3", "-o"])
            .arg(&self.output_path)
            .arg(&self.shader_path)
            .output()
            .context("failed to execute glslc")?;

        if !output.stdout.is_empty() {
            log::info!("stdout: {}", String::from_utf8_lossy(&output.stdout));
        }
        if !output.stderr.is_empty() {
            log::error!("stderr: {}", String::from_utf8_lossy(&output.stderr));
        }
        if !output.status.success() {
            bail!("failed to compile shader: {}", self.shader_path.display());
        }
        log::info!("compiled {}", self.output_path.display());
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    init_log(log::LevelFilter::Info);

    let src_dir = VireoPath::shader_root_path().join("src");
    let build_dir = VireoPath::shader_root_path().join(".build");
    std::fs::create_dir_all(&build_dir).with_context(|| format!("failed to create {}", build_dir.display()))?;

    let tasks = walkdir::WalkDir::new(&src_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|entry| ShaderCompileTask::new(&entry, &build_dir))
        .collect::<Vec<_>>();
    log::info!("{} shaders in {}", tasks.len(), src_dir.display());

    let failed = tasks
        .par_iter()
        .filter_map(|task| task.build().inspect_err(|e| log::error!("{:#}", e)).err())
        .count();
    if failed > 0 {
        bail!("{} of {} shaders failed to compile", failed, tasks.len());
    }
    Ok(())
}
