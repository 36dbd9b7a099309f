use std::path::PathBuf;

use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::connectivity::Connectivity;
use crate::ollama::{Endpoint, GenerationRequest, ModelDescriptor, OllamaClient, StreamOutcome};
use crate::transcript::Transcript;
use crate::tui::AppEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

/// State of the one-shot model listing done at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSelection {
    Loading,
    Ready {
        models: Vec<ModelDescriptor>,
        selected: usize,
    },
    Failed(String),
}

struct ActiveStream {
    id: u64,
    task: Option<JoinHandle<()>>,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,

    // Prompt input
    pub input: String,
    pub cursor: usize, // cursor position in chars

    // Conversation
    pub transcript: Transcript,
    pub status: Option<String>,
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Transcript viewport
    pub scroll: u16,
    pub follow: bool, // keep the newest text in view while streaming
    pub chat_height: u16,
    pub chat_width: u16,
    pub chat_lines: u16, // wrapped transcript height from the last frame
    pub chat_area: Option<Rect>,

    // Models
    pub models: ModelSelection,
    pub show_model_picker: bool,
    pub model_picker_state: ListState,

    // Connectivity banner
    pub connectivity: Connectivity,
    pub banner_dismissed: bool,

    pub ollama: OllamaClient,
    pub config: Config,
    config_path: Option<PathBuf>,
    events: UnboundedSender<AppEvent>,
    active: Option<ActiveStream>,
    next_request_id: u64,
}

impl App {
    pub fn new(config: Config, events: UnboundedSender<AppEvent>) -> Self {
        let ollama = OllamaClient::new(&config.base_url);

        Self {
            should_quit: false,
            input_mode: InputMode::Editing,

            input: String::new(),
            cursor: 0,

            transcript: Transcript::new(),
            status: None,
            animation_frame: 0,

            scroll: 0,
            follow: true,
            chat_height: 0,
            chat_width: 0,
            chat_lines: 0,
            chat_area: None,

            models: ModelSelection::Loading,
            show_model_picker: false,
            model_picker_state: ListState::default(),

            connectivity: Connectivity::Online,
            banner_dismissed: false,

            ollama,
            config,
            config_path: None,
            events,
            active: None,
            next_request_id: 0,
        }
    }

    /// Persist model switches to `path`.
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    /// Fetch the model list once in the background.
    pub fn start_model_listing(&self) {
        let ollama = self.ollama.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let result = ollama.list_models().await.map_err(|e| e.to_string());
            let _ = tx.send(AppEvent::ModelsLoaded(result));
        });
    }

    pub fn on_models_loaded(&mut self, result: Result<Vec<ModelDescriptor>, String>) {
        self.models = match result {
            Ok(models) if models.is_empty() => {
                warn!("server has no models installed");
                ModelSelection::Failed("no models installed".to_string())
            }
            Ok(models) => {
                let selected = self
                    .config
                    .default_model
                    .as_ref()
                    .and_then(|preferred| models.iter().position(|m| m.id() == preferred))
                    .unwrap_or(0);
                info!("selected model {}", models[selected].id());
                ModelSelection::Ready { models, selected }
            }
            Err(e) => {
                warn!("could not list models: {}", e);
                ModelSelection::Failed(e)
            }
        };
    }

    pub fn selected_model(&self) -> Option<&ModelDescriptor> {
        match &self.models {
            ModelSelection::Ready { models, selected } => models.get(*selected),
            _ => None,
        }
    }

    /// Text for the model indicator in the header
    pub fn model_label(&self) -> &str {
        match &self.models {
            ModelSelection::Loading => "Loading...",
            ModelSelection::Ready { .. } => self.selected_model().map(|m| m.id()).unwrap_or("Error"),
            ModelSelection::Failed(_) => "Error",
        }
    }

    pub fn is_generating(&self) -> bool {
        self.active.is_some()
    }

    /// Validate the input and record the new exchange in the transcript.
    ///
    /// Returns the request to stream, or None (with a status message) when the
    /// prompt cannot be sent right now.
    pub fn begin_exchange(&mut self) -> Option<(u64, GenerationRequest)> {
        let prompt = self.input.trim().to_string();
        if prompt.is_empty() {
            return None;
        }
        if self.is_generating() {
            self.status = Some("Still generating. Press Esc in normal mode to cancel.".to_string());
            return None;
        }
        let Some(model) = self.selected_model().map(|m| m.id().to_string()) else {
            self.status = Some(format!("No model available ({})", self.model_label()));
            return None;
        };

        self.transcript.push_user(prompt.clone());

        let request = match self.config.endpoint {
            Endpoint::Generate => GenerationRequest::Generate { model, prompt },
            Endpoint::Chat => GenerationRequest::Chat {
                model,
                messages: self.transcript.history(),
            },
        };

        self.transcript.begin_assistant();
        self.input.clear();
        self.cursor = 0;
        self.status = None;
        self.follow = true;
        self.scroll_to_bottom();

        self.next_request_id += 1;
        let id = self.next_request_id;
        self.active = Some(ActiveStream { id, task: None });
        Some((id, request))
    }

    /// Send the current input and start streaming the reply.
    pub fn submit_prompt(&mut self) {
        let Some((request_id, request)) = self.begin_exchange() else {
            return;
        };
        info!("request {} to {}", request_id, request.model());

        let ollama = self.ollama.clone();
        let tx = self.events.clone();
        let task = tokio::spawn(async move {
            let fragment_tx = tx.clone();
            let result = ollama
                .stream(&request, |text| {
                    let _ = fragment_tx.send(AppEvent::Fragment { request_id, text });
                })
                .await
                .map_err(|e| e.to_string());
            let _ = tx.send(AppEvent::StreamFinished { request_id, result });
        });

        if let Some(active) = self.active.as_mut() {
            active.task = Some(task);
        }
    }

    fn is_active(&self, request_id: u64) -> bool {
        self.active.as_ref().is_some_and(|a| a.id == request_id)
    }

    pub fn on_fragment(&mut self, request_id: u64, text: &str) {
        if !self.is_active(request_id) {
            return;
        }
        self.transcript.append_fragment(text);
        if self.follow {
            self.scroll_to_bottom();
        }
    }

    pub fn on_stream_finished(&mut self, request_id: u64, result: Result<StreamOutcome, String>) {
        if !self.is_active(request_id) {
            return;
        }
        self.active = None;
        self.transcript.finish();

        match result {
            Ok(outcome) => {
                info!(
                    "request {} finished with {} fragments (completed: {})",
                    request_id, outcome.fragments, outcome.completed
                );
            }
            Err(e) => {
                warn!("request {} failed: {}", request_id, e);
                self.status = Some(format!("Error: {}", e));
            }
        }
        if self.follow {
            self.scroll_to_bottom();
        }
    }

    /// Abort the running generation, keeping whatever text already arrived.
    pub fn cancel_stream(&mut self) {
        if let Some(active) = self.active.take() {
            if let Some(task) = active.task {
                task.abort();
            }
            self.transcript.finish();
            self.status = Some("Generation cancelled".to_string());
            info!("request {} cancelled", active.id);
        }
    }

    pub fn on_connectivity(&mut self, connectivity: Connectivity) {
        self.connectivity = connectivity;
        // each new outage gets a fresh banner
        if connectivity == Connectivity::Offline {
            self.banner_dismissed = false;
        }
    }

    pub fn banner_visible(&self) -> bool {
        self.connectivity == Connectivity::Offline && !self.banner_dismissed
    }

    pub fn dismiss_banner(&mut self) {
        self.banner_dismissed = true;
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.is_generating() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    // Transcript scrolling
    pub fn scroll_down(&mut self, lines: u16) {
        self.scroll = self.scroll.saturating_add(lines).min(self.max_scroll());
        self.follow = self.scroll >= self.max_scroll();
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.scroll = self.scroll.saturating_sub(lines);
        self.follow = false;
    }

    pub fn scroll_to_top(&mut self) {
        self.scroll = 0;
        self.follow = false;
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = self.max_scroll();
        self.follow = true;
    }

    pub fn half_page(&self) -> u16 {
        (self.chat_height / 2).max(1)
    }

    fn max_scroll(&self) -> u16 {
        self.chat_lines.saturating_sub(self.chat_height)
    }

    /// Record the wrapped height of the transcript as the renderer laid it out,
    /// and pin the viewport to the bottom while following.
    pub fn set_rendered_lines(&mut self, lines: usize) {
        self.chat_lines = lines.min(u16::MAX as usize) as u16;
        if self.follow {
            self.scroll = self.max_scroll();
        } else {
            self.scroll = self.scroll.min(self.max_scroll());
        }
    }

    // Model picker methods
    pub fn open_model_picker(&mut self) {
        if let ModelSelection::Ready { selected, .. } = &self.models {
            self.model_picker_state.select(Some(*selected));
            self.show_model_picker = true;
        }
    }

    pub fn model_picker_nav_down(&mut self) {
        if let ModelSelection::Ready { models, .. } = &self.models {
            let len = models.len();
            if len > 0 {
                let i = self.model_picker_state.selected().unwrap_or(0);
                self.model_picker_state.select(Some((i + 1).min(len - 1)));
            }
        }
    }

    pub fn model_picker_nav_up(&mut self) {
        let i = self.model_picker_state.selected().unwrap_or(0);
        self.model_picker_state.select(Some(i.saturating_sub(1)));
    }

    pub fn select_model(&mut self) {
        let Some(i) = self.model_picker_state.selected() else {
            return;
        };
        if let ModelSelection::Ready { models, selected } = &mut self.models {
            if let Some(model) = models.get(i) {
                *selected = i;
                let id = model.id().to_string();
                info!("switched to model {}", id);
                self.show_model_picker = false;
                self.config.default_model = Some(id.clone());
                if let Some(path) = &self.config_path {
                    if let Err(e) = Config::save_default_model(path, &id) {
                        warn!("could not save default model: {}", e);
                    }
                }
            }
        }
    }
}
