use ash::vk;

use crate::error::{GfxError, GfxResult};
use crate::types::{GraphicsPipelineDesc, VertexLayout};

/// 一条图形管线，以及它独占的 layout
pub struct VulkanPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    /// 纹理通过 push descriptor 绑定在 set 0
    pub texture_set_layout: Option<vk::DescriptorSetLayout>,
    pub push_constant_stages: vk::ShaderStageFlags,
}

// new & init
impl VulkanPipeline {
    pub fn new(device: &ash::Device, desc: &GraphicsPipelineDesc) -> GfxResult<Self> {
        let push_constant_stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;

        let texture_set_layout = if desc.textured {
            let bindings = [vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)];
            let ci = vk::DescriptorSetLayoutCreateInfo::default()
                .flags(vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR)
                .bindings(&bindings);
            Some(unsafe { device.create_descriptor_set_layout(&ci, None) }?)
        } else {
            None
        };

        let set_layouts = texture_set_layout.iter().copied().collect::<Vec<_>>();
        let push_constant_ranges = if desc.push_constant_size > 0 {
            vec![vk::PushConstantRange::default()
                .stage_flags(push_constant_stages)
                .offset(0)
                .size(desc.push_constant_size)]
        } else {
            vec![]
        };
        let layout_ci = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let layout = unsafe { device.create_pipeline_layout(&layout_ci, None) }?;

        let vertex_module = Self::create_shader_module(device, desc.vertex_spirv)?;
        let fragment_module = Self::create_shader_module(device, desc.fragment_spirv)?;
        let pipeline = Self::create_pipeline(device, desc, layout, vertex_module, fragment_module);

        // shader module 在 pipeline 创建后就不再需要
        unsafe {
            device.destroy_shader_module(vertex_module, None);
            device.destroy_shader_module(fragment_module, None);
        }

        match pipeline {
            Ok(pipeline) => Ok(Self {
                pipeline,
                layout,
                texture_set_layout,
                push_constant_stages,
            }),
            Err(e) => {
                unsafe {
                    device.destroy_pipeline_layout(layout, None);
                    if let Some(set_layout) = texture_set_layout {
                        device.destroy_descriptor_set_layout(set_layout, None);
                    }
                }
                Err(e)
            }
        }
    }

    fn create_shader_module(device: &ash::Device, spirv: &[u32]) -> GfxResult<vk::ShaderModule> {
        if spirv.is_empty() {
            return Err(GfxError::Shader("empty spirv".to_string()));
        }
        let ci = vk::ShaderModuleCreateInfo::default().code(spirv);
        unsafe { device.create_shader_module(&ci, None) }.map_err(|e| GfxError::Shader(format!("{e:?}")))
    }

    fn create_pipeline(
        device: &ash::Device,
        desc: &GraphicsPipelineDesc,
        layout: vk::PipelineLayout,
        vertex_module: vk::ShaderModule,
        fragment_module: vk::ShaderModule,
    ) -> GfxResult<vk::Pipeline> {
        // dynamic rendering 需要的 framebuffer 信息
        let color_formats = [desc.color_format];
        let mut attach_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(desc.depth_format.unwrap_or(vk::Format::UNDEFINED));

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module)
                .name(c"main"),
        ];

        let (binding_desc, attribute_desc) = vertex_input_desc(desc.vertex_layout);
        let vertex_input_state_info = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&binding_desc)
            .vertex_attribute_descriptions(&attribute_desc);

        let input_assembly_info = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // viewport 和 scissor 具体值由 dynamic 决定，但是数量由该 create info 决定
        let viewport_info = vk::PipelineViewportStateCreateInfo::default().viewport_count(1).scissor_count(1);

        let rasterize_info = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(if desc.cull_back_faces {
                vk::CullModeFlags::BACK
            } else {
                vk::CullModeFlags::NONE
            })
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);

        let msaa_info =
            vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let blend_attachment = if desc.alpha_blend {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .alpha_blend_op(vk::BlendOp::ADD)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        } else {
            vk::PipelineColorBlendAttachmentState::default().color_write_mask(vk::ColorComponentFlags::RGBA)
        };
        let blend_attachments = [blend_attachment];
        let color_blend_info = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let depth_enabled = desc.depth_format.is_some();
        let depth_stencil_info = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(depth_enabled)
            .depth_write_enable(depth_enabled)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state_info = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state_info)
            .input_assembly_state(&input_assembly_info)
            .viewport_state(&viewport_info)
            .rasterization_state(&rasterize_info)
            .multisample_state(&msaa_info)
            .color_blend_state(&color_blend_info)
            .depth_stencil_state(&depth_stencil_info)
            .layout(layout)
            .dynamic_state(&dynamic_state_info)
            .push_next(&mut attach_info);

        let pipelines = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
        }
        .map_err(|(_, e)| GfxError::from(e))?;
        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| GfxError::InvalidState(format!("no pipeline created for {}", desc.name)))
    }
}
// destroy
impl VulkanPipeline {
    pub fn destroy(self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
            if let Some(set_layout) = self.texture_set_layout {
                device.destroy_descriptor_set_layout(set_layout, None);
            }
        }
    }
}

/// 顶点布局对应的 binding 和 attribute
fn vertex_input_desc(
    layout: VertexLayout,
) -> (Vec<vk::VertexInputBindingDescription>, Vec<vk::VertexInputAttributeDescription>) {
    let binding = vec![vk::VertexInputBindingDescription {
        binding: 0,
        stride: layout.stride(),
        input_rate: vk::VertexInputRate::VERTEX,
    }];
    let attribute = |location: u32, format: vk::Format, offset: u32| vk::VertexInputAttributeDescription {
        location,
        binding: 0,
        format,
        offset,
    };
    let attributes = match layout {
        VertexLayout::Scene => vec![
            attribute(0, vk::Format::R32G32B32_SFLOAT, 0),
            attribute(1, vk::Format::R32G32B32_SFLOAT, 12),
            attribute(2, vk::Format::R32G32_SFLOAT, 24),
        ],
        VertexLayout::Ui => vec![
            attribute(0, vk::Format::R32G32_SFLOAT, 0),
            attribute(1, vk::Format::R32G32_SFLOAT, 8),
            attribute(2, vk::Format::R8G8B8A8_UNORM, 16),
        ],
    };
    (binding, attributes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_input_desc_fits_stride() {
        for layout in [VertexLayout::Scene, VertexLayout::Ui] {
            let (bindings, attributes) = vertex_input_desc(layout);
            assert_eq!(bindings[0].stride, layout.stride());
            let last = attributes.last().unwrap();
            assert!(last.offset < layout.stride());
        }
    }
}
