use std::path::{Path, PathBuf};
use std::time::Duration;

use eframe::egui::{self, ColorImage, Key, TextureHandle, TextureOptions};

use crate::audio::AudioOutput;
use crate::machine::{Machine, MachineConfig};
use crate::nes::{
    BUTTON_A, BUTTON_B, BUTTON_DOWN, BUTTON_LEFT, BUTTON_RIGHT, BUTTON_SELECT, BUTTON_START,
    BUTTON_UP,
};
use crate::runner::{EmulatorThread, FrameReceiver, RunnerOptions};

const UI_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Presentation consumer: owns the window, the audio device, and the
/// receiving end of the frame channel. All emulation happens on the
/// runner's thread; this side only takes bundles and writes input.
pub struct NesApp {
    emulator: Option<EmulatorThread>,
    frames: Option<FrameReceiver>,
    audio: Option<AudioOutput>,
    frame_texture: Option<TextureHandle>,
    status_line: String,
    loaded_rom: Option<PathBuf>,
    rom_label: String,
    last_screen_rect: Option<egui::Rect>,
    last_frame_number: u64,
    paused: bool,
}

impl NesApp {
    pub fn new(cc: &eframe::CreationContext<'_>) -> Self {
        cc.egui_ctx.set_visuals(egui::Visuals::dark());

        let audio = match AudioOutput::new() {
            Ok(audio) => Some(audio),
            Err(err) => {
                log::warn!("audio unavailable: {err}");
                None
            }
        };

        Self {
            emulator: None,
            frames: None,
            audio,
            frame_texture: None,
            status_line: "Drop a .nes file or click Open ROM".to_string(),
            loaded_rom: None,
            rom_label: String::new(),
            last_screen_rect: None,
            last_frame_number: 0,
            paused: false,
        }
    }

    fn load_rom(&mut self, path: &Path) {
        // Dropping the previous thread joins it and flushes its save RAM.
        self.emulator = None;
        self.frames = None;

        let mut config = MachineConfig::default();
        if let Some(audio) = &self.audio {
            config.sample_rate = audio.sample_rate();
        }

        let mut machine = Machine::new(config);
        match machine.load_path(path) {
            Ok(info) => {
                machine.set_power(true);
                let (thread, receiver) = EmulatorThread::spawn(machine, RunnerOptions::default());
                self.emulator = Some(thread);
                self.frames = Some(receiver);
                self.rom_label = format!("{} ({:?})", info.board, info.region);
                self.status_line = format!(
                    "Loaded {} using {}",
                    path.file_name().and_then(|f| f.to_str()).unwrap_or("ROM"),
                    self.rom_label
                );
                self.loaded_rom = Some(path.to_path_buf());
                self.frame_texture = None;
                self.last_frame_number = 0;
                self.paused = false;
            }
            Err(err) => {
                self.status_line = format!("Failed to load ROM: {err}");
            }
        }
    }

    fn open_rom_dialog(&mut self) {
        if let Some(path) = rfd::FileDialog::new()
            .add_filter("NES ROM", &["nes"])
            .set_title("Open NES ROM")
            .pick_file()
        {
            self.load_rom(&path);
        }
    }

    fn handle_dropped_files(&mut self, ctx: &egui::Context) {
        let dropped = ctx.input(|input| input.raw.dropped_files.clone());
        for file in dropped {
            if let Some(path) = file.path {
                let is_nes = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("nes"))
                    .unwrap_or(false);

                if is_nes {
                    self.load_rom(&path);
                } else {
                    self.status_line = format!("Unsupported file: {}", path.display());
                }
            }
        }
    }

    fn handle_shortcuts(&mut self, ctx: &egui::Context) {
        let open_shortcut = ctx.input(|i| i.modifiers.command && i.key_pressed(Key::O));
        if open_shortcut {
            self.open_rom_dialog();
        }

        if ctx.input(|i| i.key_pressed(Key::R))
            && let Some(emulator) = &self.emulator
        {
            emulator.request_reset();
            self.status_line = "Reset".to_string();
        }

        if ctx.input(|i| i.key_pressed(Key::P))
            && let Some(emulator) = &self.emulator
        {
            self.paused = !self.paused;
            emulator.set_paused(self.paused);
        }
    }

    fn controller_state_from_input(ctx: &egui::Context) -> u8 {
        let mut state = 0u8;

        ctx.input(|input| {
            if input.key_down(Key::W) || input.key_down(Key::ArrowUp) {
                state |= BUTTON_UP;
            }
            if input.key_down(Key::S) || input.key_down(Key::ArrowDown) {
                state |= BUTTON_DOWN;
            }
            if input.key_down(Key::A) || input.key_down(Key::ArrowLeft) {
                state |= BUTTON_LEFT;
            }
            if input.key_down(Key::D) || input.key_down(Key::ArrowRight) {
                state |= BUTTON_RIGHT;
            }
            if input.key_down(Key::Space) || input.key_down(Key::Z) {
                state |= BUTTON_A;
            }
            if input.key_down(Key::X) {
                state |= BUTTON_B;
            }
            if input.key_down(Key::Enter) {
                state |= BUTTON_START;
            }
            if input.modifiers.shift {
                state |= BUTTON_SELECT;
            }
        });

        state
    }

    fn forward_input(&mut self, ctx: &egui::Context) {
        let Some(emulator) = &self.emulator else {
            return;
        };

        emulator
            .input()
            .set_pad(0, Self::controller_state_from_input(ctx));

        let trigger = ctx.input(|input| input.pointer.primary_down());
        let pointer = ctx.input(|input| input.pointer.hover_pos());

        if let (Some(rect), Some(pos)) = (self.last_screen_rect, pointer)
            && rect.contains(pos)
            && rect.width() > 0.0
            && rect.height() > 0.0
        {
            let nx = ((pos.x - rect.left()) / rect.width() * 256.0)
                .floor()
                .clamp(0.0, 255.0) as i16;
            let ny = ((pos.y - rect.top()) / rect.height() * 240.0)
                .floor()
                .clamp(0.0, 239.0) as i16;
            emulator.input().set_zapper(nx, ny, trigger);
        } else {
            emulator.input().set_zapper(-1, -1, trigger);
        }
    }

    fn consume_frames(&mut self, ctx: &egui::Context) {
        let Some(frames) = &self.frames else {
            return;
        };

        // Single-slot channel: at most one bundle waits; taking it is the
        // acknowledgement the wait-for-consume policy would block on.
        if let Some(bundle) = frames.try_take() {
            self.last_frame_number = bundle.frame_number;

            if bundle.video.len() == 256 * 240 * 4 {
                let image = ColorImage::from_rgba_unmultiplied([256, 240], &bundle.video);
                if let Some(texture) = self.frame_texture.as_mut() {
                    texture.set(image, TextureOptions::NEAREST);
                } else {
                    self.frame_texture =
                        Some(ctx.load_texture("nes-frame", image, TextureOptions::NEAREST));
                }
            }

            if let Some(audio) = &self.audio {
                audio.push_frame(&bundle.audio);
            }
        }
    }
}

impl eframe::App for NesApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_dropped_files(ctx);
        self.handle_shortcuts(ctx);
        self.forward_input(ctx);
        self.consume_frames(ctx);

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if ui.button("Open ROM").clicked() {
                    self.open_rom_dialog();
                }

                let has_rom = self.emulator.is_some();
                if ui
                    .add_enabled(has_rom, egui::Button::new("Reset (R)"))
                    .clicked()
                    && let Some(emulator) = &self.emulator
                {
                    emulator.request_reset();
                    self.status_line = "Reset".to_string();
                }

                if ui
                    .add_enabled(
                        has_rom,
                        egui::Button::new(if self.paused { "Resume (P)" } else { "Pause (P)" }),
                    )
                    .clicked()
                    && let Some(emulator) = &self.emulator
                {
                    self.paused = !self.paused;
                    emulator.set_paused(self.paused);
                }

                if ui
                    .add_enabled(has_rom, egui::Button::new("Power Off"))
                    .clicked()
                    && let Some(emulator) = &self.emulator
                {
                    emulator.request_power_off();
                    self.status_line = "Powered off".to_string();
                }

                if let Some(path) = &self.loaded_rom {
                    ui.separator();
                    ui.label(path.display().to_string());
                }
            });
        });

        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            ui.horizontal_wrapped(|ui| {
                ui.label(&self.status_line);
                if let Some(emulator) = &self.emulator {
                    let stats = emulator.stats();
                    ui.separator();
                    ui.label(&self.rom_label);
                    ui.separator();
                    ui.label(format!(
                        "Frame {} (emulated {}, dropped {})",
                        self.last_frame_number, stats.emulated_frames, stats.dropped_frames
                    ));
                }
                ui.separator();
                if let Some(audio) = &self.audio {
                    ui.label(format!(
                        "Audio: {} Hz, queue {} ms",
                        audio.sample_rate(),
                        (audio.queued_samples() * 1000) / audio.sample_rate().max(1) as usize
                    ));
                } else {
                    ui.label("Audio: unavailable");
                }
                ui.separator();
                ui.label(
                    "Controls: WASD/arrows move, Space/Z=A, X=B, Enter=Start, Shift=Select, P=Pause, Mouse=Zapper",
                );
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                let available = ui.available_size();
                let scale_x = (available.x / 256.0).max(1.0);
                let scale_y = (available.y / 240.0).max(1.0);
                let scale = scale_x.min(scale_y).floor().max(1.0);
                let target = egui::vec2(256.0 * scale, 240.0 * scale);

                if let Some(texture) = &self.frame_texture {
                    let response = ui.add(egui::Image::new(texture).fit_to_exact_size(target));
                    self.last_screen_rect = Some(response.rect);
                }

                ui.add_space(8.0);
                ui.label("Drag/drop ROM. For Zapper games, aim with mouse and hold left click.");
            });
        });

        // The emulator runs on its own clock; poll the slot often enough
        // that a published frame never waits a full display refresh.
        ctx.request_repaint_after(UI_POLL_INTERVAL);
    }
}
