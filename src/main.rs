use raster8::app;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_inner_size([1024.0, 720.0])
            .with_min_inner_size([640.0, 480.0])
            .with_title("raster8"),
        vsync: true,
        ..Default::default()
    };

    eframe::run_native(
        "raster8",
        options,
        Box::new(|cc| Ok(Box::new(app::NesApp::new(cc)))),
    )
    .map_err(|err| anyhow::anyhow!("failed to run app: {err}"))
}
