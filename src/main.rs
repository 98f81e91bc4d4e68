use triton_render::{AttachmentOp, GraphContext, RenderBuffer, RenderGraph, RenderPass};
use triton_vulkan::{CommandBufferHandle, Instance};

/// Clears the graph's single render buffer every frame. Stands in for a
/// real scene/post-process pass so this binary exercises the graph's
/// full init/render/shutdown cycle without depending on a shader
/// compiler or asset pipeline.
struct ClearPass {
    target: String,
}

impl RenderPass for ClearPass {
    fn name(&self) -> &str {
        &self.target
    }

    fn render(&mut self, _cb: CommandBufferHandle, ctx: &mut GraphContext) -> triton_render::Result<()> {
        let _ = ctx.render_buffer_texture(&self.target);
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let instance = Instance::new("triton")?;
    let device = instance.create_device(None, triton_vulkan::score_physical_device)?;
    log::info!("running on {}", device.name());

    let mut graph = RenderGraph::new(None);
    graph.add_render_buffer(RenderBuffer::new(
        "scene_color",
        triton_vulkan::Format::R8G8B8A8Unorm,
        1,
    ))?;
    graph.add_pass(
        "clear",
        Box::new(ClearPass {
            target: "scene_color".to_string(),
        }),
    )?;

    let width = 1280;
    let height = 720;
    graph.init(&device, width, height)?;

    let cb = device.create_command_buffer()?;
    device.begin(cb)?;
    graph.render(&device, cb)?;
    device.submit_command_buffer(cb)?;
    device.wait_command_buffer(cb)?;
    device.destroy_command_buffer(cb);

    graph.shutdown(&device);
    device.wait()?;

    let _ = AttachmentOp::clear([0.0, 0.0, 0.0, 1.0]);
    Ok(())
}
