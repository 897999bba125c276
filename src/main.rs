// Batch Image Compressor - compress many images toward a quality or a target size
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod batch;
mod compression;
mod config;
mod error;
mod export;
mod input;
mod registry;
mod search;

use batch::{BatchRun, CompressOptions, ProgressEvent, RunScope};
use compression::{Encoder, ImageEncoder, OutputFormat};
use config::AppConfig;
use iced::font::{Family, Weight};
use iced::widget::{button, column, container, pick_list, progress_bar, row, scrollable, text, text_input, Space};
use iced::{event, executor, subscription, window, Application, Command, Element, Event, Font, Length, Settings, Subscription, Theme};
use registry::{ItemId, Registry, UploadItem};
use search::{Goal, SearchOutcome};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const HEADING_FONT: Font = Font {
    family: Family::SansSerif,
    weight: Weight::Bold,
    stretch: iced::font::Stretch::Normal,
    monospaced: false,
};

const BODY_FONT: Font = Font {
    family: Family::SansSerif,
    weight: Weight::Normal,
    stretch: iced::font::Stretch::Normal,
    monospaced: false,
};

pub fn main() -> iced::Result {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = AppConfig::load();

    ImageCompressor::run(Settings {
        window: iced::window::Settings {
            size: (640, 720),
            min_size: Some((560, 600)),
            resizable: true,
            decorations: true,
            ..Default::default()
        },
        default_font: BODY_FONT,
        default_text_size: 14.0,
        ..Settings::with_flags(config)
    })
}

/// Where an item stands in the current or last run.
#[derive(Debug, Clone, PartialEq)]
enum ItemState {
    Pending,
    Compressing,
    Done,
    Failed(String),
}

struct ImageCompressor {
    config: AppConfig,
    encoder: Arc<dyn Encoder>,
    registry: Registry,
    run: Option<BatchRun>,
    item_states: HashMap<ItemId, ItemState>,
    format: OutputFormat,
    quality_input: String,
    target_kb_input: String,
    progress: f32,
    status_message: String,
    last_saved: Option<PathBuf>,
}

#[derive(Debug, Clone)]
enum Message {
    SelectFiles,
    SelectFolder,
    PathsSelected(Vec<PathBuf>),
    FileDropped(PathBuf),
    UploadsLoaded(Vec<UploadItem>),
    FormatSelected(OutputFormat),
    QualityChanged(String),
    TargetSizeChanged(String),
    Compress,
    CompressOne(ItemId),
    ItemCompressed(ItemId, Result<SearchOutcome, error::CompressError>),
    Remove(ItemId),
    Save(ItemId),
    SaveAll,
    Saved(Result<PathBuf, String>),
    OpenOutputFolder,
}

impl Application for ImageCompressor {
    type Message = Message;
    type Theme = Theme;
    type Executor = executor::Default;
    type Flags = AppConfig;

    fn new(config: AppConfig) -> (Self, Command<Message>) {
        let app = Self {
            config,
            encoder: Arc::new(ImageEncoder::new()),
            registry: Registry::new(),
            run: None,
            item_states: HashMap::new(),
            format: OutputFormat::default(),
            quality_input: String::new(),
            target_kb_input: String::new(),
            progress: 0.0,
            status_message: String::new(),
            last_saved: None,
        };
        (app, Command::none())
    }

    fn title(&self) -> String {
        String::from("Batch Image Compressor")
    }

    fn update(&mut self, message: Message) -> Command<Message> {
        match message {
            Message::SelectFiles => {
                return Command::perform(select_files(), Message::PathsSelected);
            }
            Message::SelectFolder => {
                return Command::perform(select_folder(), Message::PathsSelected);
            }
            Message::PathsSelected(paths) => {
                if !paths.is_empty() {
                    return Command::perform(input::load_uploads(paths), Message::UploadsLoaded);
                }
            }
            Message::FileDropped(path) => {
                return Command::perform(input::load_uploads(vec![path]), Message::UploadsLoaded);
            }
            Message::UploadsLoaded(uploads) => {
                let added = uploads.len();
                for upload in uploads {
                    log::debug!("Added {} ({}, {} bytes)", upload.name, upload.media_type, upload.size());
                    let id = self.registry.add(upload);
                    self.item_states.insert(id, ItemState::Pending);
                }
                self.status_message = format!("Added {} images ({} total)", added, self.registry.len());
            }
            Message::FormatSelected(format) => {
                self.format = format;
            }
            Message::QualityChanged(value) => {
                self.quality_input = value;
            }
            Message::TargetSizeChanged(value) => {
                self.target_kb_input = value;
            }
            Message::Compress => {
                return self.start_run(RunScope::All);
            }
            Message::CompressOne(id) => {
                return self.start_run(RunScope::Subset(vec![id]));
            }
            Message::ItemCompressed(id, outcome) => {
                let mut events: Vec<ProgressEvent> = Vec::new();
                if let Some(run) = self.run.as_mut() {
                    run.finish_item(&mut self.registry, id, outcome, &mut events);
                }
                if self.run.as_ref().is_some_and(BatchRun::is_finished) {
                    self.run = None;
                }
                self.apply_events(events);
                return self.compress_next();
            }
            Message::Remove(id) => {
                if self.registry.remove(id) {
                    self.item_states.remove(&id);
                }
            }
            Message::Save(id) => {
                let (Some(item), Some(result)) = (self.registry.item(id), self.registry.result_for(id)) else {
                    return Command::none();
                };
                let name = export::export_name(&item.name, result.format);
                let data = result.data.clone();
                return Command::perform(save_result(name, data), Message::Saved);
            }
            Message::SaveAll => {
                let entries = export::archive_entries(&self.registry);
                if entries.is_empty() {
                    self.status_message = error::ExportError::NothingToExport.to_string();
                    return Command::none();
                }
                return Command::perform(
                    save_all(self.config.archive_name.clone(), entries),
                    Message::Saved,
                );
            }
            Message::Saved(Ok(path)) => {
                self.status_message = format!("Saved {}", path.display());
                self.last_saved = Some(path);
            }
            Message::Saved(Err(e)) => {
                if !e.is_empty() {
                    log::error!("{}", e);
                    self.status_message = e;
                }
            }
            Message::OpenOutputFolder => {
                if let Some(dir) = self.last_saved.as_deref().and_then(Path::parent) {
                    if let Err(e) = open::that(dir) {
                        log::warn!("Could not open {}: {}", dir.display(), e);
                    }
                }
            }
        }
        Command::none()
    }

    fn subscription(&self) -> Subscription<Message> {
        subscription::events_with(|event, _status: event::Status| match event {
            Event::Window(window::Event::FileDropped(path)) => Some(Message::FileDropped(path)),
            _ => None,
        })
    }

    fn view(&self) -> Element<Message> {
        let title = text("Batch Image Compressor")
            .size(22)
            .font(HEADING_FONT);

        // Input
        let file_selection = column![
            text("Add Images")
                .size(16)
                .font(HEADING_FONT),
            row![
                button("Select Files")
                    .on_press(Message::SelectFiles)
                    .padding([6, 12]),
                button("Select Folder")
                    .on_press(Message::SelectFolder)
                    .padding([6, 12]),
            ].spacing(8),
            text("...or drop files onto the window")
                .size(12)
                .font(BODY_FONT),
        ].spacing(8);

        // Settings
        let (quality_enabled, target_enabled) = input_availability(&self.quality_input, &self.target_kb_input);
        let quality_field = text_input("90", &self.quality_input)
            .width(Length::Fixed(80.0))
            .padding(4)
            .size(13);
        let target_field = text_input("Optional", &self.target_kb_input)
            .width(Length::Fixed(80.0))
            .padding(4)
            .size(13);

        let settings = column![
            text("Compression Settings")
                .size(16)
                .font(HEADING_FONT),
            row![
                text("Format:")
                    .size(13)
                    .font(BODY_FONT)
                    .width(80),
                pick_list(
                    &OutputFormat::ALL[..],
                    Some(self.format),
                    Message::FormatSelected,
                ),
                text(self.format.description())
                    .size(12)
                    .font(BODY_FONT),
            ].spacing(8),
            row![
                text("Quality %:")
                    .size(13)
                    .font(BODY_FONT)
                    .width(80),
                if quality_enabled {
                    quality_field.on_input(Message::QualityChanged)
                } else {
                    quality_field
                },
                Space::with_width(20),
                text("Target KB:")
                    .size(13)
                    .font(BODY_FONT)
                    .width(80),
                if target_enabled {
                    target_field.on_input(Message::TargetSizeChanged)
                } else {
                    target_field
                },
            ].spacing(8),
        ].spacing(8);

        // Compress button
        let compress_button = if let Some(run) = &self.run {
            button(text(format!("Compressing {}/{}...", run.processed(), run.summary().total)))
                .padding([8, 16])
        } else {
            button("Compress Images")
                .on_press(Message::Compress)
                .padding([8, 16])
        };

        let progress_section = column![
            row![
                progress_bar(0.0..=1.0, self.progress)
                    .height(Length::Fixed(6.0)),
                text(format!("{}%", (self.progress * 100.0).round()))
                    .size(12)
                    .font(BODY_FONT)
                    .width(40),
            ].spacing(8),
            text(&self.status_message)
                .size(12)
                .font(BODY_FONT),
        ].spacing(4);

        // Items
        let running = self.registry.is_locked();
        let item_rows: Vec<Element<Message>> = self.registry.items().iter().map(|item| {
            let result = self.registry.result_for(item.id);
            let state = self.item_states.get(&item.id).unwrap_or(&ItemState::Pending);
            let item_progress = match state {
                ItemState::Done => 1.0,
                ItemState::Compressing => 0.5,
                _ => 0.0,
            };
            let compressed = match (state, result) {
                (ItemState::Failed(reason), _) => format!("failed: {}", reason),
                (_, Some(result)) => format!("{} KB", kb(result.size())),
                _ => "-".to_string(),
            };

            let save = button("Save").padding([4, 8]);
            let save = if result.is_some() { save.on_press(Message::Save(item.id)) } else { save };
            let again = button("Compress").padding([4, 8]);
            let again = if running { again } else { again.on_press(Message::CompressOne(item.id)) };
            let remove = button("Remove").padding([4, 8]);
            let remove = if running { remove } else { remove.on_press(Message::Remove(item.id)) };

            row![
                text(&item.name)
                    .size(12)
                    .font(BODY_FONT)
                    .width(Length::Fill),
                text(format!("{} KB", kb(item.size())))
                    .size(12)
                    .font(BODY_FONT)
                    .width(70),
                text(compressed)
                    .size(12)
                    .font(BODY_FONT)
                    .width(90),
                progress_bar(0.0..=1.0, item_progress)
                    .height(Length::Fixed(6.0))
                    .width(Length::Fixed(60.0)),
                save,
                again,
                remove,
            ].spacing(6).align_items(iced::Alignment::Center).into()
        }).collect();

        let items_section = if item_rows.is_empty() {
            column![]
        } else {
            column![
                text(format!("Images ({})", self.registry.len()))
                    .size(16)
                    .font(HEADING_FONT),
                container(
                    scrollable(
                        column(item_rows).spacing(3)
                    ).height(Length::Fixed(220.0))
                )
                .style(iced::theme::Container::Box)
                .padding(8),
            ].spacing(8)
        };

        // Totals and saving
        let totals = self.registry.totals();
        let save_all = button("Save all as zip").padding([6, 12]);
        let save_all = if self.registry.results().is_empty() { save_all } else { save_all.on_press(Message::SaveAll) };
        let open_folder = button("Open Folder").padding([6, 12]);
        let open_folder = if self.last_saved.is_some() { open_folder.on_press(Message::OpenOutputFolder) } else { open_folder };

        let totals_section = column![
            text(format!(
                "Original: {} KB    Compressed: {} KB    Saved: {}%",
                kb(totals.original),
                kb(totals.compressed),
                totals.saved_percent_label()
            ))
                .size(13)
                .font(BODY_FONT),
            row![save_all, open_folder].spacing(8),
        ].spacing(8);

        let content = column![
            title,
            Space::with_height(12),
            file_selection,
            Space::with_height(12),
            settings,
            Space::with_height(12),
            compress_button,
            Space::with_height(8),
            progress_section,
            Space::with_height(12),
            items_section,
            Space::with_height(12),
            totals_section,
        ]
        .padding(16);

        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn theme(&self) -> Theme {
        Theme::Light
    }
}

impl ImageCompressor {
    fn options(&self) -> CompressOptions {
        CompressOptions {
            format: self.format,
            goal: parse_goal(&self.quality_input, &self.target_kb_input, self.config.default_quality_percent),
        }
    }

    fn start_run(&mut self, scope: RunScope) -> Command<Message> {
        if self.run.is_some() {
            return Command::none();
        }
        if self.registry.is_empty() {
            self.status_message = "Add images first".to_string();
            return Command::none();
        }

        let ids = match &scope {
            RunScope::All => self.registry.ids(),
            RunScope::Subset(ids) => ids.clone(),
        };
        let mut events: Vec<ProgressEvent> = Vec::new();
        let options = self.options();
        self.run = BatchRun::start(&mut self.registry, scope, self.config.batch_size, options, &mut events);
        if self.run.is_some() {
            for id in ids {
                self.item_states.insert(id, ItemState::Pending);
            }
        }
        self.apply_events(events);
        self.compress_next()
    }

    fn compress_next(&mut self) -> Command<Message> {
        let Some(run) = self.run.as_ref() else {
            return Command::none();
        };
        let Some(item) = run.current().cloned() else {
            return Command::none();
        };
        let id = item.id;
        self.item_states.insert(id, ItemState::Compressing);
        Command::perform(
            batch::compress_item(self.encoder.clone(), self.config.search.clone(), item, run.options()),
            move |outcome| Message::ItemCompressed(id, outcome),
        )
    }

    fn apply_events(&mut self, events: Vec<ProgressEvent>) {
        for event in events {
            match event {
                ProgressEvent::RunStarted { total } => {
                    self.progress = 0.0;
                    self.status_message = format!("Compressing {} images...", total);
                }
                ProgressEvent::ItemCompressed { id, .. } => {
                    self.item_states.insert(id, ItemState::Done);
                }
                ProgressEvent::ItemFailed { id, reason } => {
                    self.item_states.insert(id, ItemState::Failed(reason));
                }
                ProgressEvent::BatchCompleted { processed, total, percent } => {
                    self.progress = f32::from(percent) / 100.0;
                    self.status_message = format!("Compressed {} of {}", processed, total);
                }
                ProgressEvent::RunFinished { totals: Some(totals) } => {
                    self.progress = 1.0;
                    self.status_message = format!("Done, saved {}%", totals.saved_percent_label());
                }
                ProgressEvent::RunFinished { totals: None } => {
                    self.status_message = "Done".to_string();
                }
            }
        }
    }
}

fn kb(bytes: u64) -> String {
    format!("{:.1}", bytes as f64 / 1024.0)
}

/// Which of the quality and target inputs accept typing. A positive number in
/// one disables the other; quality wins when both hold one.
fn input_availability(quality: &str, target_kb: &str) -> (bool, bool) {
    let positive = |s: &str| s.trim().parse::<f64>().map_or(false, |v| v > 0.0);
    if positive(quality) {
        (true, false)
    } else if positive(target_kb) {
        (false, true)
    } else {
        (true, true)
    }
}

/// A positive target size wins. Otherwise the quality percentage applies, with
/// `default_percent` standing in for anything missing or outside (0, 100].
fn parse_goal(quality: &str, target_kb: &str, default_percent: f32) -> Goal {
    if let Ok(kb) = target_kb.trim().parse::<f64>() {
        if kb > 0.0 {
            return Goal::TargetSize((kb * 1024.0).round() as u64);
        }
    }
    let percent = match quality.trim().parse::<f32>() {
        Ok(p) if p > 0.0 && p <= 100.0 => p,
        _ => default_percent,
    };
    Goal::Quality(percent / 100.0)
}

// Helper functions
async fn select_files() -> Vec<PathBuf> {
    rfd::AsyncFileDialog::new()
        .add_filter("Images", &input::IMAGE_EXTENSIONS)
        .pick_files()
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|handle| handle.path().to_path_buf())
        .collect()
}

async fn select_folder() -> Vec<PathBuf> {
    rfd::AsyncFileDialog::new()
        .pick_folder()
        .await
        .map(|handle| vec![handle.path().to_path_buf()])
        .unwrap_or_default()
}

async fn pick_save_path(file_name: String) -> Option<PathBuf> {
    rfd::AsyncFileDialog::new()
        .set_file_name(file_name)
        .save_file()
        .await
        .map(|handle| handle.path().to_path_buf())
}

/// An empty error means the dialog was cancelled.
async fn save_result(file_name: String, data: Arc<[u8]>) -> Result<PathBuf, String> {
    let path = pick_save_path(file_name).await.ok_or_else(String::new)?;
    tokio::task::spawn_blocking(move || export::save_file(&path, &data).map_err(|e| e.to_string()))
        .await
        .map_err(|e| e.to_string())?
}

async fn save_all(archive_name: String, entries: Vec<(String, Arc<[u8]>)>) -> Result<PathBuf, String> {
    let path = pick_save_path(archive_name).await.ok_or_else(String::new)?;
    tokio::task::spawn_blocking(move || {
        export::save_archive(&path, &entries)
            .map(|()| path)
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| e.to_string())?
}
