//! Vireo 场景
//!
//! - [`gltf_loader::SceneLoader`]：解析 glTF/GLB，构建 [`scene::Scene`]
//! - [`node_arena`]：节点层级的校验与排序（无环、单一 parent）
//! - [`image_decode::ImageDecoder`]：在 rayon 线程池中解码纹理

pub mod error;
pub mod gltf_loader;
pub mod image_decode;
pub mod node_arena;
pub mod scene;
pub mod vertex;

pub use error::{SceneError, SceneResult};
