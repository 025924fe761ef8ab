use std::path::Path;

use crate::error::{GfxError, GfxResult};

/// 一组 vertex + fragment 的 SPIR-V 代码
#[derive(Debug, Clone, Default)]
pub struct ShaderPair {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

/// 从磁盘读取 SPIR-V 文件
pub fn load_spirv(path: &Path) -> GfxResult<Vec<u32>> {
    let mut file =
        std::fs::File::open(path).map_err(|e| GfxError::Shader(format!("failed to open {}: {}", path.display(), e)))?;
    ash::util::read_spv(&mut file).map_err(|e| GfxError::Shader(format!("invalid spir-v {}: {}", path.display(), e)))
}

impl ShaderPair {
    pub fn load(vertex: &Path, fragment: &Path) -> GfxResult<Self> {
        Ok(Self {
            vertex: load_spirv(vertex)?,
            fragment: load_spirv(fragment)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_shader_error() {
        let err = load_spirv(Path::new("/definitely/not/here.spv")).unwrap_err();
        assert!(matches!(err, GfxError::Shader(_)));
    }
}
