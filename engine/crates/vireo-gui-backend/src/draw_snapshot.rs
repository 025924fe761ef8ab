use crate::ui_vertex::UiVertex;

/// 一条 imgui 的绘制命令
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UiDrawCommand {
    /// (x1, y1, x2, y2)，imgui 的逻辑坐标
    pub clip_rect: [f32; 4],
    /// 这个 id 是 app 决定的，0 是 font atlas
    pub texture_id: usize,
    /// 相对于所在 draw list 的偏移
    pub vtx_offset: usize,
    pub idx_offset: usize,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UiDrawList {
    pub vertices: Vec<UiVertex>,
    pub indices: Vec<u16>,
    pub commands: Vec<UiDrawCommand>,
}

/// imgui DrawData 的一份拷贝
///
/// DrawData 借用了 imgui context，拷贝之后 UI 可以继续下一帧，渲染端只依赖这份数据。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UiDrawSnapshot {
    pub display_pos: [f32; 2],
    pub display_size: [f32; 2],
    pub framebuffer_scale: [f32; 2],
    pub lists: Vec<UiDrawList>,
}

impl From<&imgui::DrawData> for UiDrawSnapshot {
    fn from(draw_data: &imgui::DrawData) -> Self {
        let lists = draw_data
            .draw_lists()
            .map(|draw_list| {
                let commands = draw_list
                    .commands()
                    .filter_map(|command| match command {
                        imgui::DrawCmd::Elements {
                            count,
                            cmd_params:
                                imgui::DrawCmdParams {
                                    clip_rect,
                                    texture_id,
                                    vtx_offset,
                                    idx_offset,
                                },
                        } => Some(UiDrawCommand {
                            clip_rect,
                            texture_id: texture_id.id(),
                            vtx_offset,
                            idx_offset,
                            count,
                        }),
                        imgui::DrawCmd::ResetRenderState => {
                            log::warn!("imgui reset render state");
                            None
                        }
                        imgui::DrawCmd::RawCallback { .. } => {
                            log::warn!("imgui raw callback");
                            None
                        }
                    })
                    .collect();

                UiDrawList {
                    vertices: draw_list.vtx_buffer().iter().map(UiVertex::from).collect(),
                    indices: draw_list.idx_buffer().to_vec(),
                    commands,
                }
            })
            .collect();

        Self {
            display_pos: draw_data.display_pos,
            display_size: draw_data.display_size,
            framebuffer_scale: draw_data.framebuffer_scale,
            lists,
        }
    }
}

impl UiDrawSnapshot {
    pub fn total_vtx_count(&self) -> usize {
        self.lists.iter().map(|list| list.vertices.len()).sum()
    }

    pub fn total_idx_count(&self) -> usize {
        self.lists.iter().map(|list| list.indices.len()).sum()
    }

    /// 没有任何需要绘制的内容
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total_idx_count() == 0
    }

    /// framebuffer 的像素尺寸
    pub fn framebuffer_size(&self) -> [f32; 2] {
        [
            self.display_size[0] * self.framebuffer_scale[0],
            self.display_size[1] * self.framebuffer_scale[1],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_from_imgui_frame() {
        let mut ctx = imgui::Context::create();
        ctx.set_ini_filename(None);
        ctx.io_mut().display_size = [800.0, 600.0];
        ctx.io_mut().display_framebuffer_scale = [1.0, 1.0];
        ctx.io_mut().delta_time = 1.0 / 60.0;
        ctx.fonts().build_rgba32_texture();

        let ui = ctx.new_frame();
        ui.window("vireo")
            .position([10.0, 10.0], imgui::Condition::Always)
            .size([200.0, 100.0], imgui::Condition::Always)
            .build(|| {
                ui.text("hello");
            });
        let draw_data = ctx.render();
        let expected_vtx = draw_data.total_vtx_count as usize;
        let expected_idx = draw_data.total_idx_count as usize;

        let snapshot = UiDrawSnapshot::from(draw_data);
        assert!(!snapshot.is_empty());
        assert_eq!(snapshot.display_size, [800.0, 600.0]);
        assert_eq!(snapshot.framebuffer_size(), [800.0, 600.0]);
        assert_eq!(snapshot.total_vtx_count(), expected_vtx);
        assert_eq!(snapshot.total_idx_count(), expected_idx);
        for list in &snapshot.lists {
            for command in &list.commands {
                assert!(command.idx_offset + command.count <= list.indices.len());
            }
        }
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = UiDrawSnapshot::default();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.total_vtx_count(), 0);
    }
}
