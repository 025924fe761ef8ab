use thiserror::Error;
use vireo_gfx::GfxError;

/// 场景加载的错误
///
/// 单个 mesh / 材质的问题只会产生 [`crate::scene::SceneWarning`]，
/// 这里的错误都会让整个场景加载失败。
#[derive(Error, Debug)]
pub enum SceneError {
    /// 节点层级非法（环、悬空索引、多个 parent），或者文档本身没有通过校验
    #[error("malformed scene: {0}")]
    Malformed(String),

    #[error("missing buffer: {0}")]
    MissingBuffer(String),

    #[error("gltf error: {0}")]
    Gltf(gltf::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Gfx(#[from] GfxError),
}

pub type SceneResult<T> = Result<T, SceneError>;

impl From<gltf::Error> for SceneError {
    fn from(e: gltf::Error) -> Self {
        match e {
            gltf::Error::Validation(errors) => SceneError::Malformed(format!(
                "gltf validation failed: {}",
                errors.iter().map(|(path, err)| format!("{} {}", path, err)).collect::<Vec<_>>().join("; ")
            )),
            gltf::Error::MissingBlob => SceneError::MissingBuffer("GLB binary chunk".to_string()),
            gltf::Error::Io(e) => SceneError::Io(e),
            other => SceneError::Gltf(other),
        }
    }
}
