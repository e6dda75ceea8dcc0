use std::borrow::Cow;
use std::collections::hash_map::DefaultHasher;
use std::env;
use std::hash::{Hash, Hasher};
use std::io::{self, Cursor, Read, Stdout, Write};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, OnceLock,
};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::cursor::MoveTo;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::style::Print;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, window_size, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use image::{GenericImageView, ImageFormat};
use once_cell::sync::Lazy;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Padding, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use reqwest::blocking::Client;
use textwrap::{wrap, Options as WrapOptions};
use thiserror::Error;
use unicode_width::UnicodeWidthStr;

use crate::api;
use crate::data;

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const MAX_IMAGE_COLS: i32 = 40;
const MAX_IMAGE_ROWS: i32 = 18;
const KITTY_CHUNK_SIZE: usize = 4096;

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

const HEART_FILLED: &str = "❤️";
const HEART_OUTLINE: &str = "🤍";

const LOADING_TEXT: &str = "Загрузка...";
const LOAD_ERROR_TEXT: &str = "Ошибка загрузки";
const USER_NOT_FOUND_TEXT: &str = "Пользователь не найден";
const EMPTY_FEED_TEXT: &str = "Подпишитесь на кого-нибудь, чтобы видеть их картинки в ленте";
const EMPTY_MINE_TEXT: &str = "У вас пока нет сохранённых картинок";
const EMPTY_USER_IMAGES_TEXT: &str = "У пользователя пока нет сохранённых картинок";
const EMPTY_HISTORY_TEXT: &str = "История поиска пуста";
const EMPTY_SUBSCRIPTIONS_TEXT: &str = "Вы пока ни на кого не подписаны";
const NO_COMMENTS_TEXT: &str = "Пока нет комментариев";
const SEARCH_ERROR_TEXT: &str = "Ошибка поиска";
const NO_PHOTO_TEXT: &str = "Нет фото";

// Image bytes ride the unauthenticated proxy endpoint, so previews share
// one plain client instead of the configured API client.
static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(10))
        .user_agent("fotolenta/0.1 (kitty-preview)")
        .build()
        .expect("create http client")
});

/// Jumping to a profile straight from the subscriptions list never shipped;
/// the action stays visible so the gap is loud instead of silent.
#[derive(Debug, Error)]
pub enum ProfileJumpError {
    #[error("переход к профилю из подписок ещё не реализован")]
    NotImplemented,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Page {
    Feed,
    Mine,
    Search,
    Subscriptions,
}

impl Page {
    const ALL: [Page; 4] = [Page::Feed, Page::Mine, Page::Search, Page::Subscriptions];

    fn title(self) -> &'static str {
        match self {
            Page::Feed => "Лента",
            Page::Mine => "Мои картинки",
            Page::Search => "Поиск",
            Page::Subscriptions => "Подписки",
        }
    }

    fn index(self) -> usize {
        match self {
            Page::Feed => 0,
            Page::Mine => 1,
            Page::Search => 2,
            Page::Subscriptions => 3,
        }
    }

    fn next(self) -> Self {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    fn previous(self) -> Self {
        Self::ALL[(self.index() + Self::ALL.len() - 1) % Self::ALL.len()]
    }

    fn empty_text(self) -> &'static str {
        match self {
            Page::Feed => EMPTY_FEED_TEXT,
            Page::Mine => EMPTY_MINE_TEXT,
            Page::Search => EMPTY_HISTORY_TEXT,
            Page::Subscriptions => EMPTY_SUBSCRIPTIONS_TEXT,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum InputFocus {
    None,
    Search,
    Comment,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum SubscribeControl {
    Hidden,
    Unknown,
    Known(bool),
}

impl SubscribeControl {
    fn label(self) -> Option<&'static str> {
        match self {
            SubscribeControl::Hidden => None,
            SubscribeControl::Unknown => Some("…"),
            SubscribeControl::Known(true) => Some("Отписаться"),
            SubscribeControl::Known(false) => Some("Подписаться"),
        }
    }
}

struct Modal {
    image_id: i64,
    caption: Option<String>,
    has_file: bool,
    likes_count: i64,
    is_liked: bool,
    comments: Vec<api::Comment>,
    comment_status: String,
    comment_input: String,
    comment_scroll: u16,
    preview: Option<MediaPreview>,
}

impl Modal {
    fn from_image(image: &api::Image) -> Self {
        Self {
            image_id: image.id,
            caption: image.caption.clone(),
            has_file: image.has_file(),
            likes_count: image.likes_count,
            is_liked: image.is_liked,
            comments: Vec::new(),
            comment_status: LOADING_TEXT.to_string(),
            comment_input: String::new(),
            comment_scroll: 0,
            preview: None,
        }
    }
}

#[derive(Clone)]
struct MediaPreview {
    placeholder: Text<'static>,
    kitty: Option<KittyImage>,
}

impl MediaPreview {
    fn has_kitty(&self) -> bool {
        self.kitty.is_some()
    }

    fn kitty_mut(&mut self) -> Option<&mut KittyImage> {
        self.kitty.as_mut()
    }

    fn height(&self) -> u16 {
        self.placeholder.lines.len().min(u16::MAX as usize) as u16
    }
}

#[derive(Clone)]
struct KittyImage {
    id: u32,
    cols: i32,
    rows: i32,
    transmit_chunks: Vec<String>,
    transmitted: bool,
    wrap_tmux: bool,
}

impl KittyImage {
    fn ensure_transmitted<W: Write>(&mut self, writer: &mut W) -> io::Result<()> {
        if self.transmitted {
            return Ok(());
        }
        for chunk in &self.transmit_chunks {
            writer.write_all(chunk.as_bytes())?;
        }
        writer.flush()?;
        self.transmitted = true;
        Ok(())
    }

    fn placement_sequence(&self) -> String {
        let base = format!(
            "\x1b_Ga=p,q=2,C=1,i={},c={},r={};\x1b\\",
            self.id, self.cols, self.rows
        );
        if self.wrap_tmux {
            format!("\x1bPtmux;\x1b{base}\x1b\\")
        } else {
            base
        }
    }

    fn delete_sequence_for(id: u32, wrap_tmux: bool) -> String {
        let base = format!("\x1b_Ga=d,q=2,i={id};\x1b\\");
        if wrap_tmux {
            format!("\x1bPtmux;\x1b{base}\x1b\\")
        } else {
            base
        }
    }
}

struct ActiveKitty {
    image_id: i64,
    kitty_id: u32,
    wrap_tmux: bool,
}

#[derive(Clone, Copy)]
struct CellMetrics {
    width: f64,
    height: f64,
}

fn terminal_cell_metrics() -> CellMetrics {
    static METRICS: OnceLock<CellMetrics> = OnceLock::new();
    *METRICS.get_or_init(|| {
        window_size().ok().map_or(
            CellMetrics {
                width: 1.0,
                height: 1.0,
            },
            |size| {
                let columns = size.columns.max(1) as f64;
                let rows = size.rows.max(1) as f64;
                let width = if size.width > 0 {
                    f64::from(size.width) / columns
                } else {
                    1.0
                };
                let height = if size.height > 0 {
                    f64::from(size.height) / rows
                } else {
                    1.0
                };
                CellMetrics { width, height }
            },
        )
    })
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

struct PendingTiles {
    request_id: u64,
    page: Page,
    cancel_flag: Arc<AtomicBool>,
}

struct PendingProfileImages {
    request_id: u64,
    telegram_id: i64,
    cancel_flag: Arc<AtomicBool>,
}

struct PendingComments {
    request_id: u64,
    image_id: i64,
    cancel_flag: Arc<AtomicBool>,
}

struct PendingProfile {
    request_id: u64,
    username: String,
    cancel_flag: Arc<AtomicBool>,
}

struct PendingSubscribeState {
    request_id: u64,
    telegram_id: i64,
}

struct PendingList {
    request_id: u64,
}

struct PendingMedia {
    image_id: i64,
    cancel_flag: Arc<AtomicBool>,
}

enum AsyncResponse {
    Tiles {
        request_id: u64,
        page: Page,
        result: Result<Vec<api::Image>>,
    },
    ProfileImages {
        request_id: u64,
        telegram_id: i64,
        result: Result<Vec<api::Image>>,
    },
    Comments {
        request_id: u64,
        image_id: i64,
        result: Result<Vec<api::Comment>>,
    },
    Profile {
        request_id: u64,
        username: String,
        result: Result<Option<api::User>>,
    },
    SubscribeState {
        request_id: u64,
        telegram_id: i64,
        result: Result<bool>,
    },
    Subscriptions {
        request_id: u64,
        result: Result<Vec<api::SubscribedUser>>,
    },
    History {
        request_id: u64,
        result: Result<Vec<String>>,
    },
    LikeToggled {
        image_id: i64,
        result: Result<api::LikeUpdate>,
    },
    CommentPosted {
        image_id: i64,
        result: Result<()>,
    },
    SubscriptionToggled {
        telegram_id: i64,
        result: Result<api::SubscriptionUpdate>,
    },
    Media {
        image_id: i64,
        result: Result<Option<MediaPreview>>,
    },
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

fn like_label(is_liked: bool, count: i64) -> String {
    let heart = if is_liked { HEART_FILLED } else { HEART_OUTLINE };
    format!("{heart} {count}")
}

fn tile_line(image: &api::Image) -> String {
    let caption = image
        .caption
        .as_deref()
        .filter(|caption| !caption.trim().is_empty())
        .unwrap_or("(без подписи)");
    format!(
        "{} · 💬 {} · {}",
        like_label(image.is_liked, image.likes_count),
        image.comments_count,
        caption
    )
}

fn wrap_with_prefixes(
    text: &str,
    width: usize,
    first_prefix: &str,
    rest_prefix: &str,
    style: Style,
) -> Vec<Line<'static>> {
    if text.trim().is_empty() {
        return vec![Line::from(Span::styled(String::new(), style))];
    }

    if width == 0 {
        let mut line = String::with_capacity(first_prefix.len() + text.len());
        line.push_str(first_prefix);
        line.push_str(text);
        return vec![Line::from(Span::styled(line, style))];
    }

    let min_width = first_prefix
        .chars()
        .count()
        .max(rest_prefix.chars().count())
        .saturating_add(1);
    let wrap_width = width.max(min_width);
    let options = WrapOptions::new(wrap_width)
        .break_words(false)
        .initial_indent(first_prefix)
        .subsequent_indent(rest_prefix);

    wrap(text, options)
        .into_iter()
        .map(|cow| Line::from(Span::styled(cow.into_owned(), style)))
        .collect()
}

fn pad_lines_to_width(lines: &mut [Line<'static>], width: u16) {
    let width = width as usize;
    if width == 0 {
        return;
    }

    for line in lines {
        let mut current_width = 0usize;
        for span in &line.spans {
            current_width =
                current_width.saturating_add(UnicodeWidthStr::width(span.content.as_ref()));
        }
        if current_width >= width {
            continue;
        }
        let pad_style = line.spans.last().map(|span| span.style).unwrap_or_default();
        let padding = " ".repeat(width - current_width);
        line.spans.push(Span::styled(padding, pad_style));
    }
}

fn env_truthy(key: &str) -> bool {
    env::var(key)
        .map(|value| matches!(value.trim(), "1" | "true" | "TRUE" | "True" | "yes" | "YES"))
        .unwrap_or(false)
}

fn running_inside_tmux() -> bool {
    let in_tmux = env::var("TMUX").map(|v| !v.is_empty()).unwrap_or(false)
        || env::var("TMUX_PANE")
            .map(|v| !v.is_empty())
            .unwrap_or(false);

    if in_tmux {
        return true;
    }

    env::var("TERM")
        .map(|term| term.to_ascii_lowercase().contains("tmux"))
        .unwrap_or(false)
}

fn tmux_passthrough_enabled() -> bool {
    env::var("TMUX").map(|v| !v.is_empty()).unwrap_or(false)
}

fn is_kitty_terminal() -> bool {
    if env_truthy("FOTOLENTA_DISABLE_KITTY") {
        return false;
    }
    if env_truthy("FOTOLENTA_FORCE_KITTY") {
        return true;
    }
    let enable_override = env_truthy("FOTOLENTA_ENABLE_KITTY");
    if running_inside_tmux() && !enable_override {
        return false;
    }
    if enable_override {
        return true;
    }
    if env::var("KITTY_WINDOW_ID")
        .map(|v| !v.is_empty())
        .unwrap_or(false)
    {
        return true;
    }
    if env::var("WEZTERM_PANE")
        .map(|v| !v.is_empty())
        .unwrap_or(false)
    {
        return true;
    }
    env::var("TERM")
        .map(|term| {
            let lower = term.to_lowercase();
            lower.contains("kitty") || lower.contains("wezterm")
        })
        .unwrap_or(false)
}

fn clamp_dimensions(width: i64, height: i64, max_width: i32, max_height: i32) -> (i32, i32) {
    let metrics = terminal_cell_metrics();
    let cell_width = metrics.width.max(1.0);
    let cell_height = metrics.height.max(1.0);

    let width_px = if width <= 0 { 480.0 } else { width as f64 };
    let height_px = if height <= 0 { 480.0 } else { height as f64 };

    let mut native_cols = width_px / cell_width;
    let mut native_rows = height_px / cell_height;
    if native_cols <= 0.0 {
        native_cols = max_width.max(1) as f64;
    }
    if native_rows <= 0.0 {
        native_rows = max_height.max(1) as f64;
    }

    let max_cols = max_width.max(1) as f64;
    let max_rows = max_height.max(1) as f64;
    let scale = (max_cols / native_cols).min(max_rows / native_rows).min(1.0);
    let scale = if scale <= 0.0 { 1.0 } else { scale };

    let cols = (native_cols * scale).round().max(1.0) as i32;
    let rows = (native_rows * scale).round().max(1.0) as i32;
    (cols, rows)
}

fn fetch_image_bytes(url: &str) -> Result<Vec<u8>> {
    let response = HTTP_CLIENT
        .get(url)
        .send()
        .with_context(|| format!("request photo {url}"))?;
    if !response.status().is_success() {
        bail!("photo request returned status {}", response.status());
    }
    let mut reader = response;
    let mut bytes = Vec::with_capacity(128 * 1024);
    reader
        .read_to_end(&mut bytes)
        .with_context(|| format!("read photo body {url}"))?;
    Ok(bytes)
}

fn encode_png_for_kitty(bytes: &[u8]) -> Result<Cow<'_, [u8]>> {
    if bytes.is_empty() {
        bail!("photo had no bytes");
    }

    if matches!(image::guess_format(bytes), Ok(ImageFormat::Png)) {
        return Ok(Cow::Borrowed(bytes));
    }

    let decoded = image::load_from_memory(bytes).context("decode photo")?;
    let mut png_bytes = Vec::new();
    decoded
        .write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
        .context("encode photo as png")?;
    Ok(Cow::Owned(png_bytes))
}

fn kitty_transmit_inline(bytes: &[u8], cols: i32, rows: i32, image_id: u32) -> Result<KittyImage> {
    if bytes.is_empty() {
        bail!("no image data provided");
    }

    let png_data = encode_png_for_kitty(bytes)?;

    let cols = cols.max(1);
    let rows = rows.max(1);
    let encoded = general_purpose::STANDARD.encode(png_data.as_ref());
    if encoded.is_empty() {
        bail!("failed to encode photo preview");
    }

    let wrap_tmux = tmux_passthrough_enabled();
    let prefix = if wrap_tmux { "\x1bPtmux;\x1b" } else { "" };
    let suffix = if wrap_tmux { "\x1b\\" } else { "" };

    let mut chunks: Vec<String> = Vec::new();
    let mut offset = 0;
    while offset < encoded.len() {
        let end = usize::min(offset + KITTY_CHUNK_SIZE, encoded.len());
        let more = if end < encoded.len() { 1 } else { 0 };
        let mut out = String::new();
        out.push_str(prefix);
        if offset == 0 {
            out.push_str(&format!("\x1b_Ga=t,q=2,i={image_id},f=100,m={more};"));
        } else {
            out.push_str(&format!("\x1b_Ga=t,q=2,i={image_id},m={more};"));
        }
        out.push_str(&encoded[offset..end]);
        out.push_str("\x1b\\");
        out.push_str(suffix);
        chunks.push(out);
        offset = end;
    }

    Ok(KittyImage {
        id: image_id,
        cols,
        rows,
        transmit_chunks: chunks,
        transmitted: false,
        wrap_tmux,
    })
}

fn kitty_placeholder_text(cols: i32, rows: i32, label: &str) -> Text<'static> {
    let row_count = rows.max(1) as usize;
    let column_span = " ".repeat(cols.max(1) as usize);
    let mut lines: Vec<Line<'static>> = Vec::with_capacity(row_count + 1);
    for _ in 0..row_count {
        lines.push(Line::from(column_span.clone()));
    }
    lines.push(Line::from(Span::styled(
        format!("[фото: {label}]"),
        Style::default().fg(COLOR_TEXT_SECONDARY),
    )));
    Text::from(lines)
}

fn kitty_image_id(image_id: i64, url: &str) -> u32 {
    let mut hasher = DefaultHasher::new();
    image_id.hash(&mut hasher);
    url.hash(&mut hasher);
    (hasher.finish() & 0xFFFF_FFFF) as u32
}

fn text_placeholder(label: &str) -> Text<'static> {
    Text::from(vec![Line::from(Span::styled(
        label.to_string(),
        Style::default().fg(COLOR_TEXT_SECONDARY),
    ))])
}

fn load_image_preview(
    service: &dyn data::FeedService,
    image_id: i64,
    cancel_flag: &AtomicBool,
) -> Result<Option<MediaPreview>> {
    if cancel_flag.load(Ordering::SeqCst) {
        return Ok(None);
    }

    let url = service.image_file_url(image_id)?;

    if !is_kitty_terminal() {
        return Ok(Some(MediaPreview {
            placeholder: text_placeholder(&format!("[фото: {url}]")),
            kitty: None,
        }));
    }

    let bytes = fetch_image_bytes(&url)?;
    if cancel_flag.load(Ordering::SeqCst) {
        return Ok(None);
    }
    if bytes.is_empty() {
        bail!("photo empty");
    }

    let (width, height) = image::load_from_memory(&bytes)
        .context("decode photo dimensions")?
        .dimensions();
    let (cols, rows) = clamp_dimensions(
        i64::from(width),
        i64::from(height),
        MAX_IMAGE_COLS,
        MAX_IMAGE_ROWS,
    );
    let kitty = kitty_transmit_inline(&bytes, cols, rows, kitty_image_id(image_id, &url))?;
    if cancel_flag.load(Ordering::SeqCst) {
        return Ok(None);
    }
    let placeholder = kitty_placeholder_text(cols, rows, &url);
    Ok(Some(MediaPreview {
        placeholder,
        kitty: Some(kitty),
    }))
}

pub struct Options {
    pub status_message: String,
    pub viewer: Option<api::User>,
    pub feed_service: Option<Arc<dyn data::FeedService>>,
    pub comment_service: Option<Arc<dyn data::CommentService>>,
    pub interaction_service: Option<Arc<dyn data::InteractionService>>,
    pub user_service: Option<Arc<dyn data::UserService>>,
    pub fetch_on_start: bool,
}

pub struct Model {
    status_message: String,
    viewer: Option<api::User>,
    page: Page,

    tiles: Vec<api::Image>,
    tile_selected: usize,
    tile_notice: Option<String>,

    search_input: String,
    search_history: Vec<String>,
    history_selected: usize,
    history_notice: Option<String>,

    profile: Option<api::User>,
    profile_notice: Option<String>,
    profile_tiles: Vec<api::Image>,
    profile_tile_selected: usize,
    profile_tiles_notice: Option<String>,
    subscribe_control: SubscribeControl,

    subscriptions: Vec<api::SubscribedUser>,
    subscription_selected: usize,
    subscriptions_notice: Option<String>,

    modal: Option<Modal>,
    comments_visible: bool,
    input_focus: InputFocus,

    feed_service: Option<Arc<dyn data::FeedService>>,
    comment_service: Option<Arc<dyn data::CommentService>>,
    interaction_service: Option<Arc<dyn data::InteractionService>>,
    user_service: Option<Arc<dyn data::UserService>>,

    spinner: Spinner,
    needs_redraw: bool,

    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
    next_request_id: u64,

    pending_tiles: Option<PendingTiles>,
    pending_profile_images: Option<PendingProfileImages>,
    pending_comments: Option<PendingComments>,
    pending_profile: Option<PendingProfile>,
    pending_subscribe_state: Option<PendingSubscribeState>,
    pending_subscriptions: Option<PendingList>,
    pending_history: Option<PendingList>,
    pending_media: Option<PendingMedia>,
    like_in_flight: bool,
    comment_post_in_flight: bool,
    subscribe_toggle_in_flight: bool,

    modal_preview_area: Option<Rect>,
    needs_kitty_flush: bool,
    active_kitty: Option<ActiveKitty>,
    pending_kitty_deletes: Vec<(u32, bool)>,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let (response_tx, response_rx) = unbounded();
        let mut model = Self {
            status_message: opts.status_message,
            viewer: opts.viewer,
            page: Page::Mine,
            tiles: Vec::new(),
            tile_selected: 0,
            tile_notice: None,
            search_input: String::new(),
            search_history: Vec::new(),
            history_selected: 0,
            history_notice: None,
            profile: None,
            profile_notice: None,
            profile_tiles: Vec::new(),
            profile_tile_selected: 0,
            profile_tiles_notice: None,
            subscribe_control: SubscribeControl::Hidden,
            subscriptions: Vec::new(),
            subscription_selected: 0,
            subscriptions_notice: None,
            modal: None,
            comments_visible: false,
            input_focus: InputFocus::None,
            feed_service: opts.feed_service,
            comment_service: opts.comment_service,
            interaction_service: opts.interaction_service,
            user_service: opts.user_service,
            spinner: Spinner::new(),
            needs_redraw: true,
            response_tx,
            response_rx,
            next_request_id: 1,
            pending_tiles: None,
            pending_profile_images: None,
            pending_comments: None,
            pending_profile: None,
            pending_subscribe_state: None,
            pending_subscriptions: None,
            pending_history: None,
            pending_media: None,
            like_in_flight: false,
            comment_post_in_flight: false,
            subscribe_toggle_in_flight: false,
            modal_preview_area: None,
            needs_kitty_flush: false,
            active_kitty: None,
            pending_kitty_deletes: Vec::new(),
        };

        if opts.fetch_on_start {
            // Startup mirrors opening the app: my images, search history and
            // subscriptions load eagerly; the feed waits for its tab.
            model.reload_tiles(Page::Mine);
            model.reload_history();
            model.reload_subscriptions();
        }

        model
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.flush_inline_images(terminal.backend_mut())?;
                self.needs_redraw = false;
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        match self.handle_key(key.code) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                self.status_message = format!("Ошибка: {err}");
                                self.mark_dirty();
                            }
                        }
                    }
                }
            }

            if self.poll_async() {
                self.mark_dirty();
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.is_loading() && self.spinner.advance() {
                    self.mark_dirty();
                } else if !self.is_loading() {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
        let modal_has_kitty = self
            .modal
            .as_ref()
            .and_then(|modal| modal.preview.as_ref())
            .map(MediaPreview::has_kitty)
            .unwrap_or(false);
        if modal_has_kitty || self.active_kitty.is_some() {
            self.needs_kitty_flush = true;
        }
    }

    fn is_loading(&self) -> bool {
        self.pending_tiles.is_some()
            || self.pending_profile_images.is_some()
            || self.pending_comments.is_some()
            || self.pending_profile.is_some()
            || self.pending_subscribe_state.is_some()
            || self.pending_subscriptions.is_some()
            || self.pending_history.is_some()
            || self.pending_media.is_some()
            || self.like_in_flight
            || self.comment_post_in_flight
            || self.subscribe_toggle_in_flight
    }

    fn take_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        changed
    }

    // --- Navigation ---------------------------------------------------

    fn select_page(&mut self, page: Page) {
        self.page = page;
        self.input_focus = InputFocus::None;
        match page {
            Page::Feed | Page::Mine => self.reload_tiles(page),
            Page::Search => self.reload_history(),
            Page::Subscriptions => self.reload_subscriptions(),
        }
        self.mark_dirty();
    }

    // --- Loaders ------------------------------------------------------

    fn reload_tiles(&mut self, page: Page) {
        if let Some(pending) = self.pending_tiles.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }

        self.tiles.clear();
        self.tile_selected = 0;

        let Some(service) = self.feed_service.clone() else {
            self.tile_notice = Some(LOAD_ERROR_TEXT.to_string());
            self.status_message = "Сервис недоступен".to_string();
            return;
        };

        let request_id = self.take_request_id();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.pending_tiles = Some(PendingTiles {
            request_id,
            page,
            cancel_flag: cancel_flag.clone(),
        });
        self.tile_notice = Some(LOADING_TEXT.to_string());
        self.spinner.reset();

        let tx = self.response_tx.clone();
        thread::spawn(move || {
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let result = match page {
                Page::Feed => service.load_feed(),
                _ => service.load_my_images(),
            };
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(AsyncResponse::Tiles {
                request_id,
                page,
                result,
            });
        });
    }

    fn reload_profile_images(&mut self, telegram_id: i64) {
        if let Some(pending) = self.pending_profile_images.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }

        self.profile_tiles.clear();
        self.profile_tile_selected = 0;

        let Some(service) = self.feed_service.clone() else {
            self.profile_tiles_notice = Some(LOAD_ERROR_TEXT.to_string());
            return;
        };

        let request_id = self.take_request_id();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.pending_profile_images = Some(PendingProfileImages {
            request_id,
            telegram_id,
            cancel_flag: cancel_flag.clone(),
        });
        self.profile_tiles_notice = Some(LOADING_TEXT.to_string());

        let tx = self.response_tx.clone();
        thread::spawn(move || {
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let result = service.load_user_images(telegram_id);
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(AsyncResponse::ProfileImages {
                request_id,
                telegram_id,
                result,
            });
        });
    }

    fn reload_history(&mut self) {
        let Some(service) = self.user_service.clone() else {
            self.history_notice = Some(LOAD_ERROR_TEXT.to_string());
            return;
        };

        let request_id = self.take_request_id();
        self.pending_history = Some(PendingList { request_id });
        self.history_notice = Some(LOADING_TEXT.to_string());

        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.search_history();
            let _ = tx.send(AsyncResponse::History { request_id, result });
        });
    }

    fn reload_subscriptions(&mut self) {
        let Some(service) = self.user_service.clone() else {
            self.subscriptions_notice = Some(LOAD_ERROR_TEXT.to_string());
            return;
        };

        let request_id = self.take_request_id();
        self.pending_subscriptions = Some(PendingList { request_id });
        self.subscriptions_notice = Some(LOADING_TEXT.to_string());

        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.subscriptions();
            let _ = tx.send(AsyncResponse::Subscriptions { request_id, result });
        });
    }

    // --- Search & profile ---------------------------------------------

    fn run_search(&mut self, raw: &str) {
        let username = raw.trim().to_string();
        if username.is_empty() {
            return;
        }

        if let Some(pending) = self.pending_profile.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }
        if let Some(pending) = self.pending_profile_images.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }
        self.pending_subscribe_state = None;

        self.profile = None;
        self.profile_tiles.clear();
        self.profile_tile_selected = 0;
        self.profile_tiles_notice = None;
        self.subscribe_control = SubscribeControl::Hidden;
        self.profile_notice = Some(LOADING_TEXT.to_string());

        let Some(service) = self.user_service.clone() else {
            self.profile_notice = Some(SEARCH_ERROR_TEXT.to_string());
            return;
        };

        let request_id = self.take_request_id();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.pending_profile = Some(PendingProfile {
            request_id,
            username: username.clone(),
            cancel_flag: cancel_flag.clone(),
        });
        self.spinner.reset();
        self.status_message = format!("Ищем @{username}…");

        let tx = self.response_tx.clone();
        thread::spawn(move || {
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let result = service.lookup_user(&username);
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(AsyncResponse::Profile {
                request_id,
                username,
                result,
            });
        });
        self.mark_dirty();
    }

    fn queue_subscribe_state(&mut self, telegram_id: i64) {
        let Some(service) = self.user_service.clone() else {
            return;
        };
        let request_id = self.take_request_id();
        self.pending_subscribe_state = Some(PendingSubscribeState {
            request_id,
            telegram_id,
        });

        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service
                .subscriptions()
                .map(|subs| data::is_subscribed(&subs, telegram_id));
            let _ = tx.send(AsyncResponse::SubscribeState {
                request_id,
                telegram_id,
                result,
            });
        });
    }

    fn toggle_subscription(&mut self) {
        let Some(profile) = &self.profile else {
            return;
        };
        if self.subscribe_control == SubscribeControl::Hidden || self.subscribe_toggle_in_flight {
            return;
        }
        let Some(service) = self.interaction_service.clone() else {
            self.status_message = "Сервис недоступен".to_string();
            self.mark_dirty();
            return;
        };

        // The toggle body carries the database id; telegram_id only keys
        // the stale-response guard against the open profile.
        let target_id = profile.id;
        let telegram_id = profile.telegram_id;
        self.subscribe_toggle_in_flight = true;
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.toggle_subscription(target_id);
            let _ = tx.send(AsyncResponse::SubscriptionToggled {
                telegram_id,
                result,
            });
        });
        self.mark_dirty();
    }

    fn open_subscription_profile(&mut self) -> std::result::Result<(), ProfileJumpError> {
        Err(ProfileJumpError::NotImplemented)
    }

    // --- Modal ---------------------------------------------------------

    fn open_modal(&mut self, image: api::Image) {
        if let Some(pending) = self.pending_comments.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }
        if let Some(pending) = self.pending_media.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }
        if let Some(active) = self.active_kitty.take() {
            self.pending_kitty_deletes
                .push((active.kitty_id, active.wrap_tmux));
        }

        self.modal = Some(Modal::from_image(&image));
        self.input_focus = InputFocus::None;
        self.load_comments(image.id);
        if image.has_file() {
            self.queue_media(image.id);
        }
        self.mark_dirty();
    }

    fn close_modal(&mut self) {
        if let Some(pending) = self.pending_comments.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }
        if let Some(pending) = self.pending_media.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }
        if let Some(active) = self.active_kitty.take() {
            self.pending_kitty_deletes
                .push((active.kitty_id, active.wrap_tmux));
        }
        self.modal = None;
        self.modal_preview_area = None;
        self.input_focus = InputFocus::None;
        self.needs_kitty_flush = true;
        self.mark_dirty();
    }

    fn load_comments(&mut self, image_id: i64) {
        if let Some(pending) = self.pending_comments.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }

        let Some(service) = self.comment_service.clone() else {
            if let Some(modal) = &mut self.modal {
                modal.comment_status = LOAD_ERROR_TEXT.to_string();
            }
            return;
        };

        let request_id = self.take_request_id();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.pending_comments = Some(PendingComments {
            request_id,
            image_id,
            cancel_flag: cancel_flag.clone(),
        });
        if let Some(modal) = &mut self.modal {
            modal.comment_status = LOADING_TEXT.to_string();
        }

        let tx = self.response_tx.clone();
        thread::spawn(move || {
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let result = service.load_comments(image_id);
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(AsyncResponse::Comments {
                request_id,
                image_id,
                result,
            });
        });
    }

    fn queue_media(&mut self, image_id: i64) {
        if let Some(pending) = self.pending_media.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }
        let Some(service) = self.feed_service.clone() else {
            return;
        };

        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.pending_media = Some(PendingMedia {
            image_id,
            cancel_flag: cancel_flag.clone(),
        });

        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = load_image_preview(service.as_ref(), image_id, &cancel_flag);
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(AsyncResponse::Media { image_id, result });
        });
    }

    fn toggle_like(&mut self) {
        let Some(modal) = &self.modal else {
            return;
        };
        if self.like_in_flight {
            return;
        }
        let Some(service) = self.interaction_service.clone() else {
            self.status_message = "Сервис недоступен".to_string();
            self.mark_dirty();
            return;
        };

        let image_id = modal.image_id;
        self.like_in_flight = true;
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.toggle_like(image_id);
            let _ = tx.send(AsyncResponse::LikeToggled { image_id, result });
        });
        self.mark_dirty();
    }

    fn submit_comment(&mut self) {
        let Some(modal) = &self.modal else {
            return;
        };
        let text = modal.comment_input.trim().to_string();
        if text.is_empty() {
            return;
        }
        if self.comment_post_in_flight {
            return;
        }
        let Some(service) = self.comment_service.clone() else {
            self.status_message = "Сервис недоступен".to_string();
            self.mark_dirty();
            return;
        };

        let image_id = modal.image_id;
        self.comment_post_in_flight = true;
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.post_comment(image_id, &text);
            let _ = tx.send(AsyncResponse::CommentPosted { image_id, result });
        });
        self.mark_dirty();
    }

    fn open_image_in_browser(&mut self) {
        let Some(modal) = &self.modal else {
            return;
        };
        if !modal.has_file {
            self.status_message = NO_PHOTO_TEXT.to_string();
            self.mark_dirty();
            return;
        }
        let Some(service) = &self.feed_service else {
            return;
        };
        match service.image_file_url(modal.image_id) {
            Ok(url) => {
                if webbrowser::open(&url).is_ok() {
                    self.status_message = "Открыто в браузере".to_string();
                } else {
                    self.status_message = "Не удалось открыть браузер".to_string();
                }
            }
            Err(err) => {
                self.status_message = format!("Ошибка: {err}");
            }
        }
        self.mark_dirty();
    }

    fn copy_image_url(&mut self) {
        let Some(modal) = &self.modal else {
            return;
        };
        if !modal.has_file {
            self.status_message = NO_PHOTO_TEXT.to_string();
            self.mark_dirty();
            return;
        }
        let Some(service) = &self.feed_service else {
            return;
        };
        let result = service.image_file_url(modal.image_id).and_then(|url| {
            let mut clipboard =
                arboard::Clipboard::new().map_err(|err| anyhow!("create clipboard: {err}"))?;
            clipboard
                .set_text(url)
                .map_err(|err| anyhow!("copy to clipboard: {err}"))?;
            Ok(())
        });
        self.status_message = match result {
            Ok(()) => "Ссылка скопирована".to_string(),
            Err(err) => format!("Ошибка: {err}"),
        };
        self.mark_dirty();
    }

    // --- Key handling ---------------------------------------------------

    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        if self.modal.is_some() {
            self.handle_modal_key(code);
            return Ok(false);
        }
        if self.input_focus == InputFocus::Search {
            self.handle_search_input_key(code);
            return Ok(false);
        }

        match code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('1') => self.select_page(Page::Feed),
            KeyCode::Char('2') => self.select_page(Page::Mine),
            KeyCode::Char('3') => self.select_page(Page::Search),
            KeyCode::Char('4') => self.select_page(Page::Subscriptions),
            KeyCode::Tab => self.select_page(self.page.next()),
            KeyCode::BackTab => self.select_page(self.page.previous()),
            KeyCode::Char('r') => self.select_page(self.page),
            KeyCode::Char('/') | KeyCode::Char('i') if self.page == Page::Search => {
                self.input_focus = InputFocus::Search;
                self.mark_dirty();
            }
            KeyCode::Char('s') if self.page == Page::Search => self.toggle_subscription(),
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
            KeyCode::Enter => self.activate_selection(),
            _ => {}
        }
        Ok(false)
    }

    fn handle_search_input_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc => self.input_focus = InputFocus::None,
            KeyCode::Enter => {
                self.input_focus = InputFocus::None;
                let query = self.search_input.clone();
                self.run_search(&query);
            }
            KeyCode::Backspace => {
                self.search_input.pop();
            }
            KeyCode::Char(ch) => self.search_input.push(ch),
            _ => {}
        }
        self.mark_dirty();
    }

    fn handle_modal_key(&mut self, code: KeyCode) {
        if self.input_focus == InputFocus::Comment {
            match code {
                KeyCode::Esc => self.input_focus = InputFocus::None,
                KeyCode::Enter => self.submit_comment(),
                KeyCode::Backspace => {
                    if let Some(modal) = &mut self.modal {
                        modal.comment_input.pop();
                    }
                }
                KeyCode::Char(ch) => {
                    if let Some(modal) = &mut self.modal {
                        modal.comment_input.push(ch);
                    }
                }
                _ => {}
            }
            self.mark_dirty();
            return;
        }

        match code {
            KeyCode::Esc | KeyCode::Char('q') => self.close_modal(),
            KeyCode::Char('l') | KeyCode::Char(' ') => self.toggle_like(),
            KeyCode::Char('c') => {
                self.comments_visible = !self.comments_visible;
                self.mark_dirty();
            }
            KeyCode::Char('i') => {
                self.comments_visible = true;
                self.input_focus = InputFocus::Comment;
                self.mark_dirty();
            }
            KeyCode::Char('o') => self.open_image_in_browser(),
            KeyCode::Char('y') => self.copy_image_url(),
            KeyCode::Down | KeyCode::Char('j') => {
                if let Some(modal) = &mut self.modal {
                    modal.comment_scroll = modal.comment_scroll.saturating_add(1);
                }
                self.mark_dirty();
            }
            KeyCode::Up | KeyCode::Char('k') => {
                if let Some(modal) = &mut self.modal {
                    modal.comment_scroll = modal.comment_scroll.saturating_sub(1);
                }
                self.mark_dirty();
            }
            _ => {}
        }
    }

    fn move_selection(&mut self, delta: i64) {
        let (selected, len) = match self.page {
            Page::Feed | Page::Mine => (&mut self.tile_selected, self.tiles.len()),
            Page::Search => {
                if self.profile.is_some() {
                    (&mut self.profile_tile_selected, self.profile_tiles.len())
                } else {
                    (&mut self.history_selected, self.search_history.len())
                }
            }
            Page::Subscriptions => (&mut self.subscription_selected, self.subscriptions.len()),
        };
        if len == 0 {
            return;
        }
        let current = *selected as i64;
        let next = (current + delta).clamp(0, len as i64 - 1);
        *selected = next as usize;
        self.mark_dirty();
    }

    fn activate_selection(&mut self) {
        match self.page {
            Page::Feed | Page::Mine => {
                if let Some(image) = self.tiles.get(self.tile_selected).cloned() {
                    self.open_modal(image);
                }
            }
            Page::Search => {
                if self.profile.is_some() {
                    if let Some(image) =
                        self.profile_tiles.get(self.profile_tile_selected).cloned()
                    {
                        self.open_modal(image);
                    }
                } else if let Some(entry) =
                    self.search_history.get(self.history_selected).cloned()
                {
                    self.search_input = entry.clone();
                    self.run_search(&entry);
                }
            }
            Page::Subscriptions => {
                if self
                    .subscriptions
                    .get(self.subscription_selected)
                    .is_some()
                {
                    self.select_page(Page::Search);
                    if let Err(err) = self.open_subscription_profile() {
                        self.status_message = err.to_string();
                    }
                    self.mark_dirty();
                }
            }
        }
    }

    // --- Async responses ------------------------------------------------

    fn handle_async_response(&mut self, message: AsyncResponse) {
        match message {
            AsyncResponse::Tiles {
                request_id,
                page,
                result,
            } => {
                let Some(pending) = &self.pending_tiles else {
                    return;
                };
                if pending.cancel_flag.load(Ordering::SeqCst)
                    || pending.request_id != request_id
                    || pending.page != page
                {
                    return;
                }
                self.pending_tiles = None;

                match result {
                    Ok(images) => {
                        if images.is_empty() {
                            self.tiles.clear();
                            self.tile_notice = Some(page.empty_text().to_string());
                        } else {
                            self.tiles = images;
                            self.tile_notice = None;
                        }
                        self.tile_selected = 0;
                    }
                    Err(err) => {
                        self.tiles.clear();
                        self.tile_notice = Some(LOAD_ERROR_TEXT.to_string());
                        self.status_message = format!("{LOAD_ERROR_TEXT}: {err}");
                    }
                }
                self.mark_dirty();
            }
            AsyncResponse::ProfileImages {
                request_id,
                telegram_id,
                result,
            } => {
                let Some(pending) = &self.pending_profile_images else {
                    return;
                };
                if pending.cancel_flag.load(Ordering::SeqCst)
                    || pending.request_id != request_id
                    || pending.telegram_id != telegram_id
                {
                    return;
                }
                let current = self.profile.as_ref().map(|user| user.telegram_id);
                if current != Some(telegram_id) {
                    return;
                }
                self.pending_profile_images = None;

                match result {
                    Ok(images) => {
                        if images.is_empty() {
                            self.profile_tiles.clear();
                            self.profile_tiles_notice = Some(EMPTY_USER_IMAGES_TEXT.to_string());
                        } else {
                            self.profile_tiles = images;
                            self.profile_tiles_notice = None;
                        }
                        self.profile_tile_selected = 0;
                    }
                    Err(err) => {
                        self.profile_tiles.clear();
                        self.profile_tiles_notice = Some(LOAD_ERROR_TEXT.to_string());
                        self.status_message = format!("{LOAD_ERROR_TEXT}: {err}");
                    }
                }
                self.mark_dirty();
            }
            AsyncResponse::Comments {
                request_id,
                image_id,
                result,
            } => {
                let Some(pending) = &self.pending_comments else {
                    return;
                };
                if pending.cancel_flag.load(Ordering::SeqCst)
                    || pending.request_id != request_id
                    || pending.image_id != image_id
                {
                    return;
                }
                // The modal may have moved to a different image since the
                // request went out; stale lists never repaint it.
                let current = self.modal.as_ref().map(|modal| modal.image_id);
                if current != Some(image_id) {
                    return;
                }
                self.pending_comments = None;

                if let Some(modal) = &mut self.modal {
                    match result {
                        Ok(comments) => {
                            modal.comment_status = if comments.is_empty() {
                                NO_COMMENTS_TEXT.to_string()
                            } else {
                                String::new()
                            };
                            modal.comments = comments;
                            modal.comment_scroll = 0;
                        }
                        Err(err) => {
                            modal.comments.clear();
                            modal.comment_status = LOAD_ERROR_TEXT.to_string();
                            self.status_message = format!("{LOAD_ERROR_TEXT}: {err}");
                        }
                    }
                }
                self.mark_dirty();
            }
            AsyncResponse::Profile {
                request_id,
                username,
                result,
            } => {
                let Some(pending) = &self.pending_profile else {
                    return;
                };
                if pending.cancel_flag.load(Ordering::SeqCst)
                    || pending.request_id != request_id
                    || pending.username != username
                {
                    return;
                }
                self.pending_profile = None;

                match result {
                    Ok(Some(user)) => {
                        self.profile_notice = None;
                        let telegram_id = user.telegram_id;
                        let is_self = self
                            .viewer
                            .as_ref()
                            .map(|viewer| viewer.id == user.id)
                            .unwrap_or(true);
                        self.profile = Some(user);
                        self.subscribe_control = if is_self {
                            SubscribeControl::Hidden
                        } else {
                            SubscribeControl::Unknown
                        };
                        self.reload_profile_images(telegram_id);
                        if !is_self {
                            self.queue_subscribe_state(telegram_id);
                        }
                        self.status_message = format!("Профиль @{username}");
                    }
                    Ok(None) => {
                        self.profile = None;
                        self.profile_notice = Some(USER_NOT_FOUND_TEXT.to_string());
                        self.subscribe_control = SubscribeControl::Hidden;
                        self.status_message = USER_NOT_FOUND_TEXT.to_string();
                    }
                    Err(err) => {
                        self.profile = None;
                        self.profile_notice = Some(SEARCH_ERROR_TEXT.to_string());
                        self.subscribe_control = SubscribeControl::Hidden;
                        self.status_message = format!("{SEARCH_ERROR_TEXT}: {err}");
                    }
                }
                self.mark_dirty();
            }
            AsyncResponse::SubscribeState {
                request_id,
                telegram_id,
                result,
            } => {
                let Some(pending) = &self.pending_subscribe_state else {
                    return;
                };
                if pending.request_id != request_id || pending.telegram_id != telegram_id {
                    return;
                }
                let current = self.profile.as_ref().map(|user| user.telegram_id);
                if current != Some(telegram_id) {
                    return;
                }
                self.pending_subscribe_state = None;

                match result {
                    Ok(subscribed) => {
                        self.subscribe_control = SubscribeControl::Known(subscribed);
                    }
                    Err(err) => {
                        self.status_message = format!("{LOAD_ERROR_TEXT}: {err}");
                    }
                }
                self.mark_dirty();
            }
            AsyncResponse::Subscriptions { request_id, result } => {
                let Some(pending) = &self.pending_subscriptions else {
                    return;
                };
                if pending.request_id != request_id {
                    return;
                }
                self.pending_subscriptions = None;

                match result {
                    Ok(users) => {
                        if users.is_empty() {
                            self.subscriptions.clear();
                            self.subscriptions_notice = Some(EMPTY_SUBSCRIPTIONS_TEXT.to_string());
                        } else {
                            self.subscriptions = users;
                            self.subscriptions_notice = None;
                        }
                        self.subscription_selected = 0;
                    }
                    Err(err) => {
                        self.subscriptions.clear();
                        self.subscriptions_notice = Some(LOAD_ERROR_TEXT.to_string());
                        self.status_message = format!("{LOAD_ERROR_TEXT}: {err}");
                    }
                }
                self.mark_dirty();
            }
            AsyncResponse::History { request_id, result } => {
                let Some(pending) = &self.pending_history else {
                    return;
                };
                if pending.request_id != request_id {
                    return;
                }
                self.pending_history = None;

                match result {
                    Ok(entries) => {
                        if entries.is_empty() {
                            self.search_history.clear();
                            self.history_notice = Some(EMPTY_HISTORY_TEXT.to_string());
                        } else {
                            self.search_history = entries;
                            self.history_notice = None;
                        }
                        self.history_selected = 0;
                    }
                    Err(err) => {
                        self.search_history.clear();
                        self.history_notice = Some(LOAD_ERROR_TEXT.to_string());
                        self.status_message = format!("{LOAD_ERROR_TEXT}: {err}");
                    }
                }
                self.mark_dirty();
            }
            AsyncResponse::LikeToggled { image_id, result } => {
                self.like_in_flight = false;
                let current = self.modal.as_ref().map(|modal| modal.image_id);
                if current != Some(image_id) {
                    return;
                }
                match result {
                    Ok(update) => {
                        // The server owns the like state; render exactly what
                        // it reported.
                        if let Some(modal) = &mut self.modal {
                            modal.likes_count = update.likes_count;
                            modal.is_liked = update.is_liked;
                        }
                    }
                    Err(err) => {
                        self.status_message = format!("Ошибка лайка: {err}");
                    }
                }
                self.mark_dirty();
            }
            AsyncResponse::CommentPosted { image_id, result } => {
                self.comment_post_in_flight = false;
                let current = self.modal.as_ref().map(|modal| modal.image_id);
                if current != Some(image_id) {
                    return;
                }
                match result {
                    Ok(()) => {
                        if let Some(modal) = &mut self.modal {
                            modal.comment_input.clear();
                        }
                        self.load_comments(image_id);
                    }
                    Err(err) => {
                        self.status_message = format!("Ошибка отправки комментария: {err}");
                    }
                }
                self.mark_dirty();
            }
            AsyncResponse::SubscriptionToggled {
                telegram_id,
                result,
            } => {
                self.subscribe_toggle_in_flight = false;
                let current = self.profile.as_ref().map(|user| user.telegram_id);
                if current != Some(telegram_id) {
                    return;
                }
                match result {
                    Ok(update) => {
                        self.subscribe_control = SubscribeControl::Known(update.is_subscribed);
                    }
                    Err(err) => {
                        self.status_message = format!("Ошибка подписки: {err}");
                    }
                }
                self.mark_dirty();
            }
            AsyncResponse::Media { image_id, result } => {
                let Some(pending) = &self.pending_media else {
                    return;
                };
                if pending.cancel_flag.load(Ordering::SeqCst) || pending.image_id != image_id {
                    return;
                }
                let current = self.modal.as_ref().map(|modal| modal.image_id);
                if current != Some(image_id) {
                    return;
                }
                self.pending_media = None;

                match result {
                    Ok(Some(preview)) => {
                        if let Some(modal) = &mut self.modal {
                            modal.preview = Some(preview);
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        if let Some(modal) = &mut self.modal {
                            modal.preview = Some(MediaPreview {
                                placeholder: text_placeholder(LOAD_ERROR_TEXT),
                                kitty: None,
                            });
                        }
                        self.status_message = format!("Ошибка превью: {err}");
                    }
                }
                self.mark_dirty();
            }
        }
    }

    // --- Drawing --------------------------------------------------------

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        let status_text = if self.is_loading() {
            format!("{} {}", self.spinner.frame(), self.status_message)
                .trim()
                .to_string()
        } else {
            self.status_message.clone()
        };
        let status_line = Paragraph::new(status_text).style(
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, layout[0]);

        self.draw_nav(frame, layout[1]);

        match self.page {
            Page::Feed | Page::Mine => {
                draw_tile_list(
                    frame,
                    layout[2],
                    self.page.title(),
                    &self.tiles,
                    self.tile_selected,
                    self.tile_notice.as_deref(),
                );
            }
            Page::Search => self.draw_search(frame, layout[2]),
            Page::Subscriptions => self.draw_subscriptions(frame, layout[2]),
        }

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(footer, layout[3]);

        self.modal_preview_area = None;
        if self.modal.is_some() {
            self.draw_modal(frame, full);
        }
    }

    fn draw_nav(&self, frame: &mut Frame<'_>, area: Rect) {
        let mut spans: Vec<Span<'static>> = Vec::new();
        for (index, page) in Page::ALL.iter().enumerate() {
            let label = format!(" {} {} ", index + 1, page.title());
            let style = if *page == self.page {
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(COLOR_TEXT_SECONDARY)
            };
            spans.push(Span::styled(label, style));
            spans.push(Span::raw(" "));
        }
        frame.render_widget(
            Paragraph::new(Line::from(spans)).style(Style::default().bg(COLOR_PANEL_BG)),
            area,
        );
    }

    fn draw_search(&self, frame: &mut Frame<'_>, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(0)])
            .split(area);

        let input_focused = self.input_focus == InputFocus::Search;
        let cursor = if input_focused { "▌" } else { "" };
        let input = Paragraph::new(format!("{}{}", self.search_input, cursor))
            .style(Style::default().fg(COLOR_TEXT_PRIMARY))
            .block(
                Block::default()
                    .title("Поиск по username")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(if input_focused {
                        COLOR_BORDER_FOCUSED
                    } else {
                        COLOR_BORDER_IDLE
                    }))
                    .style(Style::default().bg(COLOR_PANEL_BG)),
            );
        frame.render_widget(input, chunks[0]);

        if let Some(notice) = &self.profile_notice {
            let style = if notice == USER_NOT_FOUND_TEXT {
                Style::default().fg(COLOR_TEXT_SECONDARY)
            } else {
                Style::default().fg(COLOR_ERROR)
            };
            let paragraph = Paragraph::new(notice.clone())
                .style(style)
                .alignment(Alignment::Center)
                .block(panel_block("Профиль"));
            frame.render_widget(paragraph, chunks[1]);
            return;
        }

        if let Some(profile) = &self.profile {
            let profile_chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Length(4), Constraint::Min(0)])
                .split(chunks[1]);

            let mut lines = vec![Line::from(Span::styled(
                format!("{} · {}", profile.display_name(), profile.handle()),
                Style::default()
                    .fg(COLOR_TEXT_PRIMARY)
                    .add_modifier(Modifier::BOLD),
            ))];
            if let Some(label) = self.subscribe_control.label() {
                lines.push(Line::from(Span::styled(
                    format!("[s] {label}"),
                    Style::default().fg(COLOR_ACCENT),
                )));
            }
            frame.render_widget(
                Paragraph::new(lines).block(panel_block("Профиль")),
                profile_chunks[0],
            );

            draw_tile_list(
                frame,
                profile_chunks[1],
                "Картинки пользователя",
                &self.profile_tiles,
                self.profile_tile_selected,
                self.profile_tiles_notice.as_deref(),
            );
            return;
        }

        if let Some(notice) = &self.history_notice {
            let paragraph = Paragraph::new(notice.clone())
                .style(Style::default().fg(COLOR_TEXT_SECONDARY))
                .alignment(Alignment::Center)
                .block(panel_block("История поиска"));
            frame.render_widget(paragraph, chunks[1]);
            return;
        }

        let items: Vec<ListItem<'_>> = self
            .search_history
            .iter()
            .map(|entry| ListItem::new(format!("@{entry}")))
            .collect();
        let mut state = ListState::default();
        state.select(if self.search_history.is_empty() {
            None
        } else {
            Some(self.history_selected.min(self.search_history.len() - 1))
        });
        let list = List::new(items)
            .block(panel_block("История поиска"))
            .style(Style::default().fg(COLOR_TEXT_PRIMARY))
            .highlight_style(
                Style::default()
                    .fg(COLOR_ACCENT)
                    .bg(COLOR_PANEL_FOCUSED_BG)
                    .add_modifier(Modifier::BOLD),
            );
        frame.render_stateful_widget(list, chunks[1], &mut state);
    }

    fn draw_subscriptions(&self, frame: &mut Frame<'_>, area: Rect) {
        if let Some(notice) = &self.subscriptions_notice {
            let style = if notice == LOAD_ERROR_TEXT {
                Style::default().fg(COLOR_ERROR)
            } else {
                Style::default().fg(COLOR_TEXT_SECONDARY)
            };
            let paragraph = Paragraph::new(notice.clone())
                .style(style)
                .alignment(Alignment::Center)
                .block(panel_block("Подписки"));
            frame.render_widget(paragraph, area);
            return;
        }

        let items: Vec<ListItem<'_>> = self
            .subscriptions
            .iter()
            .map(|user| {
                let name = user.full_name();
                let label = if name.is_empty() {
                    user.handle()
                } else {
                    format!("{name} · {}", user.handle())
                };
                ListItem::new(label)
            })
            .collect();
        let mut state = ListState::default();
        state.select(if self.subscriptions.is_empty() {
            None
        } else {
            Some(self.subscription_selected.min(self.subscriptions.len() - 1))
        });
        let list = List::new(items)
            .block(panel_block("Подписки"))
            .style(Style::default().fg(COLOR_TEXT_PRIMARY))
            .highlight_style(
                Style::default()
                    .fg(COLOR_ACCENT)
                    .bg(COLOR_PANEL_FOCUSED_BG)
                    .add_modifier(Modifier::BOLD),
            );
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn draw_modal(&mut self, frame: &mut Frame<'_>, full: Rect) {
        let Some(modal) = &self.modal else {
            return;
        };

        let area = centered_rect(72, 84, full);
        frame.render_widget(Clear, area);
        let block = Block::default()
            .title(Span::styled(
                "Просмотр фото",
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_FOCUSED))
            .style(Style::default().bg(COLOR_PANEL_BG))
            .padding(Padding::uniform(1));
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let preview_height = modal
            .preview
            .as_ref()
            .map(MediaPreview::height)
            .unwrap_or(1)
            .min(inner.height.saturating_sub(3));
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(preview_height),
                Constraint::Length(2),
                Constraint::Min(0),
            ])
            .split(inner);

        let preview_text = match &modal.preview {
            Some(preview) => preview.placeholder.clone(),
            None if modal.has_file => Text::from(LOADING_TEXT),
            None => Text::from(NO_PHOTO_TEXT),
        };
        frame.render_widget(
            Paragraph::new(preview_text).style(Style::default().fg(COLOR_TEXT_SECONDARY)),
            chunks[0],
        );
        if modal
            .preview
            .as_ref()
            .map(MediaPreview::has_kitty)
            .unwrap_or(false)
        {
            self.modal_preview_area = Some(chunks[0]);
        }

        let caption = modal
            .caption
            .as_deref()
            .filter(|caption| !caption.trim().is_empty())
            .unwrap_or("(без подписи)");
        let meta = vec![
            Line::from(Span::styled(
                caption.to_string(),
                Style::default().fg(COLOR_TEXT_PRIMARY),
            )),
            Line::from(Span::styled(
                format!(
                    "{}   💬 {}",
                    like_label(modal.is_liked, modal.likes_count),
                    modal.comments.len()
                ),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )),
        ];
        frame.render_widget(Paragraph::new(meta), chunks[1]);

        if !self.comments_visible {
            frame.render_widget(
                Paragraph::new("c — комментарии · l — лайк · o — открыть · Esc — закрыть")
                    .style(Style::default().fg(COLOR_TEXT_SECONDARY)),
                chunks[2],
            );
            return;
        }

        let width = chunks[2].width.max(1) as usize;
        let mut lines: Vec<Line<'static>> = Vec::new();
        if !modal.comment_status.is_empty() {
            lines.push(Line::from(Span::styled(
                modal.comment_status.clone(),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )));
        }
        for comment in &modal.comments {
            lines.extend(wrap_with_prefixes(
                comment.author_label(),
                width,
                "• ",
                "  ",
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ));
            lines.extend(wrap_with_prefixes(
                &comment.text,
                width,
                "  ",
                "  ",
                Style::default().fg(COLOR_TEXT_PRIMARY),
            ));
        }
        if self.input_focus == InputFocus::Comment {
            lines.push(Line::from(Span::styled(
                format!("Комментарий: {}▌", modal.comment_input),
                Style::default().fg(COLOR_TEXT_PRIMARY),
            )));
        } else {
            lines.push(Line::from(Span::styled(
                "i — написать комментарий".to_string(),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )));
        }
        pad_lines_to_width(&mut lines, chunks[2].width);
        let comments = Paragraph::new(Text::from(lines))
            .scroll((modal.comment_scroll, 0))
            .wrap(Wrap { trim: false });
        frame.render_widget(comments, chunks[2]);
    }

    fn footer_text(&self) -> String {
        if self.modal.is_some() {
            if self.input_focus == InputFocus::Comment {
                return "Enter — отправить · Esc — отмена".to_string();
            }
            return "l — лайк · c — комментарии · i — написать · o — браузер · y — ссылка · Esc — закрыть"
                .to_string();
        }
        if self.input_focus == InputFocus::Search {
            return "Enter — искать · Esc — отмена".to_string();
        }
        match self.page {
            Page::Feed | Page::Mine => {
                "j/k — выбор · Enter — открыть · 1-4/Tab — вкладки · r — обновить · q — выход"
                    .to_string()
            }
            Page::Search => {
                "/ — ввод · j/k — выбор · Enter — открыть · s — подписка · q — выход".to_string()
            }
            Page::Subscriptions => {
                "j/k — выбор · Enter — профиль · 1-4/Tab — вкладки · q — выход".to_string()
            }
        }
    }

    fn flush_inline_images(&mut self, backend: &mut CrosstermBackend<Stdout>) -> Result<()> {
        for (id, wrap_tmux) in std::mem::take(&mut self.pending_kitty_deletes) {
            backend.execute(Print(KittyImage::delete_sequence_for(id, wrap_tmux)))?;
        }

        if !self.needs_kitty_flush {
            return Ok(());
        }
        self.needs_kitty_flush = false;

        let modal_image = self.modal.as_ref().map(|modal| modal.image_id);
        if let Some(active) = &self.active_kitty {
            if modal_image != Some(active.image_id) || self.modal_preview_area.is_none() {
                backend.execute(Print(KittyImage::delete_sequence_for(
                    active.kitty_id,
                    active.wrap_tmux,
                )))?;
                self.active_kitty = None;
            }
        }

        let (Some(area), Some(modal)) = (self.modal_preview_area, self.modal.as_mut()) else {
            return Ok(());
        };
        let image_id = modal.image_id;
        let Some(preview) = modal.preview.as_mut() else {
            return Ok(());
        };
        let Some(kitty) = preview.kitty_mut() else {
            return Ok(());
        };

        kitty.ensure_transmitted(backend)?;
        let sequence = kitty.placement_sequence();
        crossterm::queue!(backend, MoveTo(area.x, area.y), Print(sequence))?;
        backend.flush()?;

        let kitty_id = kitty.id;
        let wrap_tmux = kitty.wrap_tmux;
        self.active_kitty = Some(ActiveKitty {
            image_id,
            kitty_id,
            wrap_tmux,
        });

        Ok(())
    }
}

fn panel_block(title: &str) -> Block<'_> {
    Block::default()
        .title(Span::styled(
            title.to_string(),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        ))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(COLOR_BORDER_IDLE))
        .style(Style::default().bg(COLOR_PANEL_BG))
        .padding(Padding::uniform(1))
}

fn draw_tile_list(
    frame: &mut Frame<'_>,
    area: Rect,
    title: &str,
    images: &[api::Image],
    selected: usize,
    notice: Option<&str>,
) {
    if let Some(notice) = notice {
        let style = if notice == LOAD_ERROR_TEXT {
            Style::default().fg(COLOR_ERROR)
        } else {
            Style::default().fg(COLOR_TEXT_SECONDARY)
        };
        let paragraph = Paragraph::new(notice.to_string())
            .style(style)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(panel_block(title));
        frame.render_widget(paragraph, area);
        return;
    }

    let items: Vec<ListItem<'_>> = images
        .iter()
        .map(|image| ListItem::new(tile_line(image)))
        .collect();
    let mut state = ListState::default();
    state.select(if images.is_empty() {
        None
    } else {
        Some(selected.min(images.len() - 1))
    });
    let list = List::new(items)
        .block(panel_block(title))
        .style(Style::default().fg(COLOR_TEXT_PRIMARY))
        .highlight_style(
            Style::default()
                .fg(COLOR_ACCENT)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        );
    frame.render_stateful_widget(list, area, &mut state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, AtomicUsize};

    struct CountingFeedService {
        feed_calls: AtomicUsize,
        my_calls: AtomicUsize,
        images: Vec<api::Image>,
    }

    impl CountingFeedService {
        fn with_images(images: Vec<api::Image>) -> Arc<Self> {
            Arc::new(Self {
                feed_calls: AtomicUsize::new(0),
                my_calls: AtomicUsize::new(0),
                images,
            })
        }
    }

    impl data::FeedService for CountingFeedService {
        fn load_feed(&self) -> Result<Vec<api::Image>> {
            self.feed_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.images.clone())
        }

        fn load_my_images(&self) -> Result<Vec<api::Image>> {
            self.my_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.images.clone())
        }

        fn load_user_images(&self, _telegram_id: i64) -> Result<Vec<api::Image>> {
            Ok(self.images.clone())
        }

        fn image_file_url(&self, image_id: i64) -> Result<String> {
            Ok(format!("https://photos.test/api/images/{image_id}/file"))
        }
    }

    struct CountingCommentService {
        load_calls: AtomicUsize,
        post_calls: AtomicUsize,
    }

    impl CountingCommentService {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                load_calls: AtomicUsize::new(0),
                post_calls: AtomicUsize::new(0),
            })
        }
    }

    impl data::CommentService for CountingCommentService {
        fn load_comments(&self, image_id: i64) -> Result<Vec<api::Comment>> {
            self.load_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![api::Comment {
                first_name: None,
                username: Some("tester".into()),
                text: format!("img{image_id}"),
            }])
        }

        fn post_comment(&self, _image_id: i64, _text: &str) -> Result<()> {
            self.post_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct RecordingInteractionService {
        last_subscription_target: AtomicI64,
    }

    impl RecordingInteractionService {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                last_subscription_target: AtomicI64::new(0),
            })
        }
    }

    impl data::InteractionService for RecordingInteractionService {
        fn toggle_like(&self, _image_id: i64) -> Result<api::LikeUpdate> {
            Ok(api::LikeUpdate {
                likes_count: 0,
                is_liked: false,
            })
        }

        fn toggle_subscription(&self, target_id: i64) -> Result<api::SubscriptionUpdate> {
            self.last_subscription_target
                .store(target_id, Ordering::SeqCst);
            Ok(api::SubscriptionUpdate {
                is_subscribed: true,
            })
        }
    }

    struct MissingUserService;

    impl data::UserService for MissingUserService {
        fn lookup_user(&self, _username: &str) -> Result<Option<api::User>> {
            Ok(None)
        }

        fn subscriptions(&self) -> Result<Vec<api::SubscribedUser>> {
            Ok(Vec::new())
        }

        fn search_history(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn image(id: i64) -> api::Image {
        api::Image {
            id,
            file_path: None,
            caption: Some(format!("photo {id}")),
            likes_count: 0,
            comments_count: 0,
            is_liked: false,
        }
    }

    fn viewer() -> api::User {
        api::User {
            id: 7,
            telegram_id: 70,
            username: Some("viewer".into()),
            first_name: Some("Viewer".into()),
            last_name: None,
        }
    }

    fn test_model(
        feed: Option<Arc<dyn data::FeedService>>,
        comments: Option<Arc<dyn data::CommentService>>,
        interactions: Option<Arc<dyn data::InteractionService>>,
        users: Option<Arc<dyn data::UserService>>,
    ) -> Model {
        Model::new(Options {
            status_message: String::new(),
            viewer: Some(viewer()),
            feed_service: feed,
            comment_service: comments,
            interaction_service: interactions,
            user_service: users,
            fetch_on_start: false,
        })
    }

    fn pump_one(model: &mut Model) {
        let message = model
            .response_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("async response");
        model.handle_async_response(message);
    }

    #[test]
    fn page_switch_fires_loader_exactly_once() {
        let feed = CountingFeedService::with_images(vec![image(1)]);
        let mut model = test_model(Some(feed.clone()), None, None, None);

        model.select_page(Page::Feed);
        pump_one(&mut model);
        assert_eq!(feed.feed_calls.load(Ordering::SeqCst), 1);
        assert_eq!(model.page, Page::Feed);
        assert_eq!(model.tiles.len(), 1);

        // Re-selecting the active page re-fetches.
        model.select_page(Page::Feed);
        pump_one(&mut model);
        assert_eq!(feed.feed_calls.load(Ordering::SeqCst), 2);
        assert_eq!(feed.my_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_feed_shows_empty_state_and_no_tiles() {
        let feed = CountingFeedService::with_images(Vec::new());
        let mut model = test_model(Some(feed), None, None, None);

        model.select_page(Page::Feed);
        pump_one(&mut model);
        assert!(model.tiles.is_empty());
        assert_eq!(model.tile_notice.as_deref(), Some(EMPTY_FEED_TEXT));
    }

    #[test]
    fn empty_my_images_show_their_own_text() {
        let feed = CountingFeedService::with_images(Vec::new());
        let mut model = test_model(Some(feed), None, None, None);

        model.select_page(Page::Mine);
        pump_one(&mut model);
        assert_eq!(model.tile_notice.as_deref(), Some(EMPTY_MINE_TEXT));
    }

    #[test]
    fn like_response_overrides_displayed_state() {
        let comments: Arc<dyn data::CommentService> = Arc::new(data::MockCommentService);
        let mut model = test_model(None, Some(comments), None, None);
        model.open_modal(image(5));
        pump_one(&mut model);

        model.handle_async_response(AsyncResponse::LikeToggled {
            image_id: 5,
            result: Ok(api::LikeUpdate {
                likes_count: 5,
                is_liked: true,
            }),
        });

        let modal = model.modal.as_ref().expect("modal open");
        assert_eq!(modal.likes_count, 5);
        assert!(modal.is_liked);
        assert_eq!(like_label(modal.is_liked, modal.likes_count), "❤️ 5");
    }

    #[test]
    fn stale_like_response_is_discarded() {
        let comments: Arc<dyn data::CommentService> = Arc::new(data::MockCommentService);
        let mut model = test_model(None, Some(comments), None, None);
        model.open_modal(image(5));
        pump_one(&mut model);

        model.handle_async_response(AsyncResponse::LikeToggled {
            image_id: 99,
            result: Ok(api::LikeUpdate {
                likes_count: 42,
                is_liked: true,
            }),
        });

        let modal = model.modal.as_ref().expect("modal open");
        assert_eq!(modal.likes_count, 0);
        assert!(!modal.is_liked);
    }

    #[test]
    fn user_not_found_hides_profile_and_shows_message() {
        let users: Arc<dyn data::UserService> = Arc::new(MissingUserService);
        let mut model = test_model(None, None, None, Some(users));

        model.run_search("ghost");
        pump_one(&mut model);

        assert!(model.profile.is_none());
        assert_eq!(model.profile_notice.as_deref(), Some(USER_NOT_FOUND_TEXT));
        assert_eq!(model.subscribe_control, SubscribeControl::Hidden);
    }

    #[test]
    fn blank_search_is_a_no_op() {
        let users: Arc<dyn data::UserService> = Arc::new(MissingUserService);
        let mut model = test_model(None, None, None, Some(users));

        model.run_search("   ");
        assert!(model.pending_profile.is_none());
        assert!(model.profile_notice.is_none());
    }

    #[test]
    fn empty_comment_performs_no_network_call() {
        let comments = CountingCommentService::new();
        let mut model = test_model(None, Some(comments.clone()), None, None);
        model.open_modal(image(3));
        pump_one(&mut model);

        model.modal.as_mut().unwrap().comment_input = "   ".to_string();
        model.submit_comment();

        assert_eq!(comments.post_calls.load(Ordering::SeqCst), 0);
        assert!(model.pending_comments.is_none());
    }

    #[test]
    fn comment_submission_clears_input_and_reloads_once() {
        let comments = CountingCommentService::new();
        let mut model = test_model(None, Some(comments.clone()), None, None);
        model.open_modal(image(3));
        pump_one(&mut model);
        assert_eq!(comments.load_calls.load(Ordering::SeqCst), 1);

        model.modal.as_mut().unwrap().comment_input = "Отличное фото".to_string();
        model.submit_comment();
        pump_one(&mut model); // comment accepted
        assert!(model.modal.as_ref().unwrap().comment_input.is_empty());
        pump_one(&mut model); // reloaded comment list

        assert_eq!(comments.post_calls.load(Ordering::SeqCst), 1);
        assert_eq!(comments.load_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn comments_follow_the_latest_open_image() {
        let comments = CountingCommentService::new();
        let mut model = test_model(None, Some(comments), None, None);

        // Open image 1, then image 2 before 1's comments land. The first
        // worker may or may not send depending on when it sees its cancel
        // flag, so drain until the second request settles.
        model.open_modal(image(1));
        model.open_modal(image(2));
        let deadline = Instant::now() + Duration::from_secs(5);
        while model.pending_comments.is_some() && Instant::now() < deadline {
            if let Ok(message) = model.response_rx.recv_timeout(Duration::from_millis(100)) {
                model.handle_async_response(message);
            }
        }
        while let Ok(message) = model.response_rx.try_recv() {
            model.handle_async_response(message);
        }

        let modal = model.modal.as_ref().expect("modal open");
        assert_eq!(modal.image_id, 2);
        assert_eq!(modal.comments.len(), 1);
        assert_eq!(modal.comments[0].text, "img2");
    }

    #[test]
    fn comments_panel_flag_survives_modal_close() {
        let comments: Arc<dyn data::CommentService> = Arc::new(data::MockCommentService);
        let mut model = test_model(None, Some(comments), None, None);
        model.open_modal(image(1));
        model.comments_visible = true;
        model.close_modal();
        assert!(model.modal.is_none());
        assert!(model.comments_visible);
    }

    #[test]
    fn subscription_jump_reports_not_implemented() {
        let users: Arc<dyn data::UserService> = Arc::new(data::MockUserService);
        let mut model = test_model(None, None, None, Some(users));

        model.select_page(Page::Subscriptions);
        pump_one(&mut model);
        assert_eq!(model.subscriptions.len(), 1);

        model.activate_selection();
        assert_eq!(model.page, Page::Search);
        assert_eq!(
            model.status_message,
            ProfileJumpError::NotImplemented.to_string()
        );
        // Selecting the search page fired the history loader; drain it.
        pump_one(&mut model);
    }

    #[test]
    fn subscribe_toggle_trusts_server_boolean() {
        let users: Arc<dyn data::UserService> = Arc::new(data::MockUserService);
        let interactions: Arc<dyn data::InteractionService> =
            Arc::new(data::MockInteractionService);
        let feed = CountingFeedService::with_images(Vec::new());
        let mut model = test_model(Some(feed), None, Some(interactions), Some(users));

        model.run_search("anna");
        pump_one(&mut model); // profile
        pump_one(&mut model); // user images
        pump_one(&mut model); // subscription scan
        assert_eq!(model.subscribe_control, SubscribeControl::Known(true));

        model.handle_async_response(AsyncResponse::SubscriptionToggled {
            telegram_id: 1000,
            result: Ok(api::SubscriptionUpdate {
                is_subscribed: false,
            }),
        });
        assert_eq!(model.subscribe_control, SubscribeControl::Known(false));
    }

    #[test]
    fn subscribe_toggle_sends_profile_database_id() {
        let users: Arc<dyn data::UserService> = Arc::new(data::MockUserService);
        let interactions = RecordingInteractionService::new();
        let feed = CountingFeedService::with_images(Vec::new());
        let mut model = test_model(Some(feed), None, Some(interactions.clone()), Some(users));

        model.run_search("anna");
        pump_one(&mut model); // profile
        pump_one(&mut model); // user images
        pump_one(&mut model); // subscription scan

        model.toggle_subscription();
        pump_one(&mut model);

        // The profile carries id 1 and telegram_id 1000; the toggle body
        // must send the database id, not the telegram id.
        assert_eq!(
            interactions.last_subscription_target.load(Ordering::SeqCst),
            1
        );
        assert_eq!(model.subscribe_control, SubscribeControl::Known(true));
    }

    #[test]
    fn search_failure_shows_search_error_text() {
        struct FailingUserService;

        impl data::UserService for FailingUserService {
            fn lookup_user(&self, _username: &str) -> Result<Option<api::User>> {
                bail!("connection reset")
            }

            fn subscriptions(&self) -> Result<Vec<api::SubscribedUser>> {
                bail!("connection reset")
            }

            fn search_history(&self) -> Result<Vec<String>> {
                bail!("connection reset")
            }
        }

        let users: Arc<dyn data::UserService> = Arc::new(FailingUserService);
        let mut model = test_model(None, None, None, Some(users));

        model.run_search("anna");
        pump_one(&mut model);

        assert!(model.profile.is_none());
        assert_eq!(model.profile_notice.as_deref(), Some("Ошибка поиска"));
    }

    #[test]
    fn empty_comment_list_shows_placeholder() {
        struct EmptyCommentService;

        impl data::CommentService for EmptyCommentService {
            fn load_comments(&self, _image_id: i64) -> Result<Vec<api::Comment>> {
                Ok(Vec::new())
            }

            fn post_comment(&self, _image_id: i64, _text: &str) -> Result<()> {
                Ok(())
            }
        }

        let comments: Arc<dyn data::CommentService> = Arc::new(EmptyCommentService);
        let mut model = test_model(None, Some(comments), None, None);
        model.open_modal(image(1));
        pump_one(&mut model);

        let modal = model.modal.as_ref().expect("modal open");
        assert!(modal.comments.is_empty());
        assert_eq!(modal.comment_status, "Пока нет комментариев");
    }

    #[test]
    fn pages_cycle_in_order() {
        assert_eq!(Page::Feed.next(), Page::Mine);
        assert_eq!(Page::Subscriptions.next(), Page::Feed);
        assert_eq!(Page::Feed.previous(), Page::Subscriptions);
    }

    #[test]
    fn tile_line_shows_badges_and_caption() {
        let mut img = image(1);
        img.likes_count = 3;
        img.comments_count = 2;
        let line = tile_line(&img);
        assert!(line.contains("🤍 3"));
        assert!(line.contains("💬 2"));
        assert!(line.contains("photo 1"));

        img.caption = None;
        assert!(tile_line(&img).contains("(без подписи)"));
    }

    #[test]
    fn pad_lines_extends_to_width() {
        let mut lines = vec![Line::from(vec![Span::raw("abc")])];
        pad_lines_to_width(&mut lines, 6);
        assert_eq!(lines[0].spans.len(), 2);
        assert_eq!(lines[0].spans[1].content.as_ref(), "   ");
    }

    #[test]
    fn wrap_handles_blank_text() {
        let lines = wrap_with_prefixes("   ", 10, "", "", Style::default());
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn kitty_placeholder_matches_dimensions() {
        let placeholder = kitty_placeholder_text(4, 2, "example");
        assert_eq!(placeholder.lines.len(), 3);
        assert_eq!(placeholder.lines[0].spans[0].content.as_ref(), "    ");
        assert_eq!(
            placeholder.lines[2].spans[0].content.as_ref(),
            "[фото: example]"
        );
    }
}
