use vireo_winit_app::app::VireoApp;

fn main() -> anyhow::Result<()> {
    VireoApp::run()
}
