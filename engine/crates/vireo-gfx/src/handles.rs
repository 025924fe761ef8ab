//! 后端内部对象的句柄
//!
//! 后端使用 SlotMap 存放真正的 vk 对象，对外只暴露带代际的 key。
//! key 被销毁之后再次使用会查询失败，而不是访问到悬空对象。

slotmap::new_key_type! { pub struct RawBuffer; }
slotmap::new_key_type! { pub struct RawImage; }
slotmap::new_key_type! { pub struct RawFence; }
slotmap::new_key_type! { pub struct RawSemaphore; }
slotmap::new_key_type! { pub struct RawCommandBuffer; }
slotmap::new_key_type! { pub struct RawPipeline; }
