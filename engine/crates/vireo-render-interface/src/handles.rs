use slotmap::new_key_type;

// 资源管理器对外提供的句柄，带有 generation，释放后再次解析会得到 None
new_key_type! { pub struct GpuBufferHandle; }
new_key_type! { pub struct GpuImageHandle; }
