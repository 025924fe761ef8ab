use ash::vk;

use crate::commands::{GfxCommand, ImageRef};
use crate::error::{GfxError, GfxResult};
use crate::types::is_depth_format;
use crate::vulkan::VulkanObjects;
use crate::vulkan::device::VulkanDevice;
use crate::vulkan::swapchain::VulkanSwapchain;

/// layout 对应的 stage 和 access，用于推导 barrier
fn layout_stage_access(layout: vk::ImageLayout) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
    match layout {
        vk::ImageLayout::UNDEFINED => (vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (vk::PipelineStageFlags2::COPY, vk::AccessFlags2::TRANSFER_WRITE),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            (vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_SAMPLED_READ)
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL | vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => (vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::NONE),
        _ => (
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
        ),
    }
}

/// 把一条命令翻译成 vulkan 调用
pub(super) fn record_command(
    device: &VulkanDevice,
    objects: &VulkanObjects,
    swapchain: Option<&VulkanSwapchain>,
    sampler: vk::Sampler,
    cmd: vk::CommandBuffer,
    command: GfxCommand,
) -> GfxResult<()> {
    let d = &device.device;

    // 返回 image、view、aspect
    let resolve_image = |image: ImageRef| -> GfxResult<(vk::Image, vk::ImageView, vk::ImageAspectFlags)> {
        match image {
            ImageRef::Image(raw) => {
                let image = objects.images.get(raw).ok_or(GfxError::InvalidHandle("image"))?;
                let aspect = if is_depth_format(image.desc.format) {
                    vk::ImageAspectFlags::DEPTH
                } else {
                    vk::ImageAspectFlags::COLOR
                };
                Ok((image.handle, image.view, aspect))
            }
            ImageRef::Swapchain(index) => {
                let (image, view) = swapchain
                    .and_then(|swapchain| swapchain.image(index))
                    .ok_or(GfxError::InvalidHandle("swapchain image"))?;
                Ok((image, view, vk::ImageAspectFlags::COLOR))
            }
        }
    };

    unsafe {
        match command {
            GfxCommand::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let src = objects.buffers.get(src).ok_or(GfxError::InvalidHandle("buffer"))?;
                let dst = objects.buffers.get(dst).ok_or(GfxError::InvalidHandle("buffer"))?;
                let region = vk::BufferCopy {
                    src_offset,
                    dst_offset,
                    size,
                };
                d.cmd_copy_buffer(cmd, src.handle, dst.handle, std::slice::from_ref(&region));
            }
            GfxCommand::CopyBufferToImage {
                src,
                src_offset,
                dst,
                extent,
            } => {
                let src = objects.buffers.get(src).ok_or(GfxError::InvalidHandle("buffer"))?;
                let dst = objects.images.get(dst).ok_or(GfxError::InvalidHandle("image"))?;
                let region = vk::BufferImageCopy::default()
                    .buffer_offset(src_offset)
                    .image_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .mip_level(0)
                            .layer_count(1),
                    )
                    .image_extent(vk::Extent3D {
                        width: extent.width,
                        height: extent.height,
                        depth: 1,
                    });
                d.cmd_copy_buffer_to_image(
                    cmd,
                    src.handle,
                    dst.handle,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&region),
                );
            }
            GfxCommand::ImageBarrier {
                image,
                old_layout,
                new_layout,
            } => {
                let (image, _, aspect) = resolve_image(image)?;
                let (src_stage, src_access) = layout_stage_access(old_layout);
                let (dst_stage, dst_access) = layout_stage_access(new_layout);
                let barrier = vk::ImageMemoryBarrier2::default()
                    .image(image)
                    .old_layout(old_layout)
                    .new_layout(new_layout)
                    .src_stage_mask(src_stage)
                    .src_access_mask(src_access)
                    .dst_stage_mask(dst_stage)
                    .dst_access_mask(dst_access)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(aspect)
                            .level_count(vk::REMAINING_MIP_LEVELS)
                            .layer_count(vk::REMAINING_ARRAY_LAYERS),
                    );
                let dependency_info =
                    vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
                d.cmd_pipeline_barrier2(cmd, &dependency_info);
            }
            GfxCommand::BeginRendering {
                color,
                clear_color,
                depth,
                clear_depth,
                extent,
            } => {
                let (_, color_view, _) = resolve_image(color)?;
                let color_attach = vk::RenderingAttachmentInfo::default()
                    .image_view(color_view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(if clear_color.is_some() {
                        vk::AttachmentLoadOp::CLEAR
                    } else {
                        vk::AttachmentLoadOp::LOAD
                    })
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .clear_value(vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: clear_color.unwrap_or_default(),
                        },
                    });
                let depth_attach = match depth {
                    Some(depth) => {
                        let (_, depth_view, _) = resolve_image(ImageRef::Image(depth))?;
                        Some(
                            vk::RenderingAttachmentInfo::default()
                                .image_view(depth_view)
                                .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                                .load_op(if clear_depth.is_some() {
                                    vk::AttachmentLoadOp::CLEAR
                                } else {
                                    vk::AttachmentLoadOp::LOAD
                                })
                                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                                .clear_value(vk::ClearValue {
                                    depth_stencil: vk::ClearDepthStencilValue {
                                        depth: clear_depth.unwrap_or(1.0),
                                        stencil: 0,
                                    },
                                }),
                        )
                    }
                    None => None,
                };

                let mut rendering_info = vk::RenderingInfo::default()
                    .render_area(vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent,
                    })
                    .layer_count(1)
                    .color_attachments(std::slice::from_ref(&color_attach));
                if let Some(depth_attach) = depth_attach.as_ref() {
                    rendering_info = rendering_info.depth_attachment(depth_attach);
                }
                d.cmd_begin_rendering(cmd, &rendering_info);
            }
            GfxCommand::EndRendering => d.cmd_end_rendering(cmd),
            GfxCommand::BindPipeline(pipeline) => {
                let pipeline = objects.pipelines.get(pipeline).ok_or(GfxError::InvalidHandle("pipeline"))?;
                d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
            }
            GfxCommand::BindVertexBuffer { buffer, offset } => {
                let buffer = objects.buffers.get(buffer).ok_or(GfxError::InvalidHandle("buffer"))?;
                d.cmd_bind_vertex_buffers(cmd, 0, &[buffer.handle], &[offset]);
            }
            GfxCommand::BindIndexBuffer {
                buffer,
                offset,
                index_type,
            } => {
                let buffer = objects.buffers.get(buffer).ok_or(GfxError::InvalidHandle("buffer"))?;
                d.cmd_bind_index_buffer(cmd, buffer.handle, offset, index_type.to_vk());
            }
            GfxCommand::PushConstants { pipeline, offset, data } => {
                let pipeline = objects.pipelines.get(pipeline).ok_or(GfxError::InvalidHandle("pipeline"))?;
                d.cmd_push_constants(cmd, pipeline.layout, pipeline.push_constant_stages, offset, &data);
            }
            GfxCommand::BindTexture { pipeline, image } => {
                let pipeline = objects.pipelines.get(pipeline).ok_or(GfxError::InvalidHandle("pipeline"))?;
                if pipeline.texture_set_layout.is_none() {
                    return Err(GfxError::InvalidState("pipeline has no texture binding".to_string()));
                }
                let image = objects.images.get(image).ok_or(GfxError::InvalidHandle("image"))?;
                let image_info = vk::DescriptorImageInfo::default()
                    .sampler(sampler)
                    .image_view(image.view)
                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
                let write = vk::WriteDescriptorSet::default()
                    .dst_binding(0)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(std::slice::from_ref(&image_info));
                device.push_descriptor.cmd_push_descriptor_set(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    pipeline.layout,
                    0,
                    std::slice::from_ref(&write),
                );
            }
            GfxCommand::SetViewport { x, y, width, height } => {
                let viewport = vk::Viewport {
                    x,
                    y,
                    width,
                    height,
                    min_depth: 0.0,
                    max_depth: 1.0,
                };
                d.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
            }
            GfxCommand::SetScissor(rect) => d.cmd_set_scissor(cmd, 0, std::slice::from_ref(&rect)),
            GfxCommand::DrawIndexed {
                index_count,
                first_index,
                vertex_offset,
            } => d.cmd_draw_indexed(cmd, index_count, 1, first_index, vertex_offset, 0),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_stage_access() {
        let (stage, access) = layout_stage_access(vk::ImageLayout::UNDEFINED);
        assert_eq!(stage, vk::PipelineStageFlags2::TOP_OF_PIPE);
        assert_eq!(access, vk::AccessFlags2::NONE);

        let (stage, access) = layout_stage_access(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(stage, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);
        assert!(access.contains(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE));
    }
}
