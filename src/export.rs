use chrono::{DateTime, Local};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbaImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use resvg::tiny_skia::{IntSize, Pixmap, PixmapPaint, Transform};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use usvg::fontdb;

use crate::bracket::{BracketStore, Competitor};
use crate::config::{repo_root, resolve_repo_path};
use crate::layout::{layout_bracket, BracketLayout, Connector, Rect, CARD_HEIGHT};
use crate::theme::{theme_or_default, Theme};
use crate::types::{AppConfig, ExportRequestBody, LARGE_BRACKET_MATCHES};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("nothing to export: no bracket has been generated")]
    EmptyBracket,
    #[error("image {reference} failed to load: {message}")]
    ImageLoad { reference: String, message: String },
    #[error("render error: {0}")]
    Render(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("export was cancelled")]
    Cancelled,
    #[error("export task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    pub theme: String,
    pub show_champion: bool,
    pub show_subtitles: bool,
    pub particles: bool,
    pub vignette: bool,
}

impl ExportOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        ExportOptions {
            theme: config.theme.clone(),
            show_champion: config.show_champion,
            show_subtitles: config.show_subtitles,
            particles: config.particles,
            vignette: config.vignette,
        }
    }

    pub fn with_overrides(mut self, body: &ExportRequestBody) -> Self {
        if let Some(theme) = body.theme.as_deref().filter(|t| !t.trim().is_empty()) {
            self.theme = theme.to_string();
        }
        self.show_champion = body.show_champion.unwrap_or(self.show_champion);
        self.show_subtitles = body.show_subtitles.unwrap_or(self.show_subtitles);
        self.particles = body.particles.unwrap_or(self.particles);
        self.vignette = body.vignette.unwrap_or(self.vignette);
        self
    }
}

// ── Canvas sizing ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasPolicy {
    pub scale: f32,
    pub max_dimension: u32,
}

/// Large brackets render at a higher scale and a bigger cap so text stays
/// legible when the image is zoomed.
pub fn canvas_policy(first_round_matches: usize) -> CanvasPolicy {
    if first_round_matches > LARGE_BRACKET_MATCHES {
        CanvasPolicy {
            scale: 3.0,
            max_dimension: 16_384,
        }
    } else {
        CanvasPolicy {
            scale: 2.0,
            max_dimension: 8_192,
        }
    }
}

/// Pixel size and effective scale for a layout under a policy.
pub fn canvas_size(layout: &BracketLayout, policy: CanvasPolicy) -> (u32, u32, f32) {
    let longest = layout.width.max(layout.height).max(1.0);
    let scale = policy.scale.min(policy.max_dimension as f32 / longest);
    let width = ((layout.width * scale).ceil() as u32).clamp(1, policy.max_dimension);
    let height = ((layout.height * scale).ceil() as u32).clamp(1, policy.max_dimension);
    (width, height, scale)
}

pub fn export_file_name(now: DateTime<Local>) -> String {
    format!("bracket-{}.png", now.format("%Y%m%d-%H%M%S"))
}

// ── Request ────────────────────────────────────────────────────────────

/// Everything a rasterizer needs, detached from the session lock.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub store: BracketStore,
    pub layout: BracketLayout,
    pub theme: Theme,
    pub options: ExportOptions,
}

impl ExportRequest {
    pub fn new(store: BracketStore, options: ExportOptions) -> Result<Self, ExportError> {
        if store.is_empty() {
            return Err(ExportError::EmptyBracket);
        }
        let layout = layout_bracket(&store);
        let theme = *theme_or_default(&options.theme);
        Ok(ExportRequest {
            store,
            layout,
            theme,
            options,
        })
    }

    /// Distinct image references across every slot of the bracket.
    pub fn image_references(&self) -> Vec<String> {
        let mut refs: Vec<String> = self
            .store
            .rounds
            .iter()
            .flatten()
            .flat_map(|m| m.occupants())
            .filter_map(|c| c.image.clone())
            .collect();
        refs.sort();
        refs.dedup();
        refs
    }
}

pub trait Rasterizer: Send + Sync + 'static {
    /// Render the request to encoded image bytes. `cancelled` is polled
    /// between stages; once it returns true the rasterizer stops with
    /// `ExportError::Cancelled`.
    fn rasterize(
        &self,
        request: &ExportRequest,
        cancelled: &mut dyn FnMut() -> bool,
    ) -> Result<Vec<u8>, ExportError>;
}

// ── SVG scene ──────────────────────────────────────────────────────────

const NAME_CHARS: usize = 26;
const SUBTITLE_CHARS: usize = 34;
const FONT_FAMILY: &str = "DejaVu Sans, Liberation Sans, Arial, Helvetica, sans-serif";

/// The bracket as an SVG document in layout coordinates. Avatars are not
/// part of the document; the rasterizer draws them into the space reserved
/// left of the name.
pub fn bracket_svg(request: &ExportRequest) -> String {
    let layout = &request.layout;
    let theme = &request.theme;
    let (width, height) = (layout.width, layout.height);
    let mut svg = String::with_capacity(8 * 1024);

    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}" font-family="{FONT_FAMILY}">"#
    ));
    svg.push_str(
        r##"<defs><radialGradient id="vignette" cx="50%" cy="50%" r="75%"><stop offset="60%" stop-color="#000" stop-opacity="0"/><stop offset="100%" stop-color="#000" stop-opacity="0.45"/></radialGradient></defs>"##,
    );
    svg.push_str(&format!(
        r#"<rect width="{width}" height="{height}" {}/>"#,
        paint("fill", theme.background)
    ));

    for connector in &layout.connectors {
        svg.push_str(&polyline(connector, theme.connector));
    }

    for (round, cards) in layout.rounds.iter().enumerate() {
        let winners = request.store.winners.get(round).map(Vec::as_slice).unwrap_or(&[]);
        for (match_index, card) in cards.iter().enumerate() {
            let Some(m) = request.store.rounds.get(round).and_then(|r| r.get(match_index)) else {
                continue;
            };
            card_svg(&mut svg, card, [m.a.as_ref(), m.b.as_ref()], winners, request);
        }
    }

    if request.options.show_champion {
        if let (Some(rect), Some(link)) = (layout.champion, layout.champion_link.as_ref()) {
            svg.push_str(&polyline(link, theme.champion));
            champion_svg(&mut svg, &rect, request.store.champion(), theme);
        }
    }
    if request.options.particles {
        let seed = request.store.champion().map(|c| c.id as u64).unwrap_or(0);
        particles_svg(&mut svg, width, height, theme.particle, seed);
    }
    if request.options.vignette {
        svg.push_str(&format!(
            r#"<rect width="{width}" height="{height}" fill="url(#vignette)"/>"#
        ));
    }
    svg.push_str("</svg>");
    svg
}

fn card_svg(
    svg: &mut String,
    card: &Rect,
    slots: [Option<&Competitor>; 2],
    winners: &[Competitor],
    request: &ExportRequest,
) {
    let theme = &request.theme;
    let row_height = card.height / 2.0;
    let base = if slots.iter().all(Option::is_none) {
        theme.card_empty
    } else {
        theme.card
    };
    svg.push_str(&rect_svg(card.x, card.y, card.width, card.height, base, 6.0));

    for (row, slot) in slots.iter().enumerate() {
        let Some(competitor) = slot else {
            continue;
        };
        let top = card.y + row as f32 * row_height;
        if winners.iter().any(|w| w.id == competitor.id) {
            svg.push_str(&rect_svg(card.x, top, card.width, row_height, theme.card_winner, 0.0));
        }
        let text_left = if competitor.image.is_some() {
            card.x + row_height + 4.0
        } else {
            card.x + 12.0
        };
        let subtitle = competitor
            .subtitle
            .as_deref()
            .filter(|_| request.options.show_subtitles);
        let name_baseline = if subtitle.is_some() { top + 15.0 } else { top + 20.5 };
        svg.push_str(&text_svg(
            text_left,
            name_baseline,
            r#"font-size="13" font-weight="bold""#,
            theme.name_text,
            &clip_text(&competitor.name, NAME_CHARS),
        ));
        if let Some(subtitle) = subtitle {
            svg.push_str(&text_svg(
                text_left,
                top + 27.0,
                r#"font-size="9""#,
                theme.subtitle_text,
                &clip_text(subtitle, SUBTITLE_CHARS),
            ));
        }
    }

    svg.push_str(&rect_svg(card.x, card.y, 4.0, card.height, theme.accent, 0.0));
    svg.push_str(&rect_svg(card.x, card.y + row_height - 0.5, card.width, 1.0, theme.connector, 0.0));
}

fn champion_svg(svg: &mut String, rect: &Rect, champion: Option<&Competitor>, theme: &Theme) {
    match champion {
        Some(competitor) => {
            svg.push_str(&rect_svg(rect.x, rect.y, rect.width, rect.height, theme.champion, 8.0));
            svg.push_str(&text_svg(
                rect.x + rect.width / 2.0,
                rect.center_y() + 5.5,
                r#"font-size="16" font-weight="bold" text-anchor="middle""#,
                theme.name_text,
                &clip_text(&competitor.name, NAME_CHARS),
            ));
        }
        None => svg.push_str(&rect_svg(rect.x, rect.y, rect.width, rect.height, theme.card_empty, 8.0)),
    }
}

fn particles_svg(svg: &mut String, width: f32, height: f32, color: [u8; 4], seed: u64) {
    let count = ((width * height) as u64 / 2_000).clamp(16, 4_000);
    let mut rng = StdRng::seed_from_u64(0x5EED_B4AC ^ seed);
    for _ in 0..count {
        let cx = rng.random_range(0.0..width);
        let cy = rng.random_range(0.0..height);
        let r = rng.random_range(0.5..1.5f32);
        svg.push_str(&format!(
            r#"<circle cx="{cx:.1}" cy="{cy:.1}" r="{r:.2}" {}/>"#,
            paint("fill", color)
        ));
    }
}

fn rect_svg(x: f32, y: f32, w: f32, h: f32, color: [u8; 4], radius: f32) -> String {
    format!(
        r#"<rect x="{x}" y="{y}" width="{w}" height="{h}" rx="{radius}" {}/>"#,
        paint("fill", color)
    )
}

fn polyline(connector: &Connector, color: [u8; 4]) -> String {
    let points: Vec<String> = connector.points.iter().map(|[x, y]| format!("{x},{y}")).collect();
    format!(
        r#"<polyline points="{}" fill="none" stroke-width="2" {}/>"#,
        points.join(" "),
        paint("stroke", color)
    )
}

fn text_svg(x: f32, y: f32, style: &str, color: [u8; 4], content: &str) -> String {
    format!(
        r#"<text x="{x}" y="{y}" {style} {}>{}</text>"#,
        paint("fill", color),
        escape_xml(content)
    )
}

/// `fill="rgb(..)"` plus an opacity attribute for translucent colors.
fn paint(attr: &str, color: [u8; 4]) -> String {
    let [r, g, b, a] = color;
    if a == 255 {
        format!(r#"{attr}="rgb({r},{g},{b})""#)
    } else {
        format!(r#"{attr}="rgb({r},{g},{b})" {attr}-opacity="{:.3}""#, a as f32 / 255.0)
    }
}

fn clip_text(raw: &str, max_chars: usize) -> String {
    if raw.chars().count() <= max_chars {
        return raw.to_string();
    }
    let mut clipped: String = raw.chars().take(max_chars.saturating_sub(1)).collect();
    clipped.push('…');
    clipped
}

fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

// ── PNG rasterizer ─────────────────────────────────────────────────────

/// System fonts plus anything in the repo's `fonts/` directory, loaded once.
pub fn font_database() -> Arc<fontdb::Database> {
    static FONTS: OnceLock<Arc<fontdb::Database>> = OnceLock::new();
    FONTS
        .get_or_init(|| {
            let mut db = fontdb::Database::new();
            db.load_system_fonts();
            db.load_fonts_dir(repo_root().join("fonts"));

            let query = fontdb::Query {
                families: &[fontdb::Family::SansSerif],
                ..fontdb::Query::default()
            };
            if db.query(&query).is_none() {
                let fallback = db
                    .faces()
                    .find_map(|face| face.families.first().map(|(name, _)| name.clone()));
                if let Some(family) = fallback {
                    db.set_sans_serif_family(family);
                }
            }
            if db.is_empty() {
                warn!("no fonts found; exported brackets will have no text");
            }
            debug!(faces = db.len(), "font database loaded");
            Arc::new(db)
        })
        .clone()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PngRasterizer;

impl Rasterizer for PngRasterizer {
    fn rasterize(
        &self,
        request: &ExportRequest,
        cancelled: &mut dyn FnMut() -> bool,
    ) -> Result<Vec<u8>, ExportError> {
        checkpoint(cancelled)?;
        let policy = canvas_policy(request.store.first_round_matches());
        let (width, height, scale) = canvas_size(&request.layout, policy);
        let thumb_size = ((CARD_HEIGHT / 2.0 - 8.0) * scale).max(1.0) as u32;
        let avatars = load_avatars(request, thumb_size, cancelled)?;

        let svg = bracket_svg(request);
        let options = usvg::Options {
            fontdb: font_database(),
            ..Default::default()
        };
        let tree = usvg::Tree::from_str(&svg, &options).map_err(|e| ExportError::Render(e.to_string()))?;
        checkpoint(cancelled)?;

        let mut pixmap = Pixmap::new(width, height)
            .ok_or_else(|| ExportError::Render(format!("failed to allocate {width}x{height} canvas")))?;
        resvg::render(&tree, Transform::from_scale(scale, scale), &mut pixmap.as_mut());
        checkpoint(cancelled)?;

        draw_avatars(&mut pixmap, request, &avatars, scale);
        checkpoint(cancelled)?;

        let bytes = encode_png(&pixmap)?;
        debug!(width, height, bytes = bytes.len(), "rasterized bracket");
        Ok(bytes)
    }
}

fn checkpoint(cancelled: &mut dyn FnMut() -> bool) -> Result<(), ExportError> {
    if cancelled() {
        return Err(ExportError::Cancelled);
    }
    Ok(())
}

/// Load every referenced image up front; one failure fails the export.
fn load_avatars(
    request: &ExportRequest,
    size: u32,
    cancelled: &mut dyn FnMut() -> bool,
) -> Result<HashMap<String, Pixmap>, ExportError> {
    let mut out = HashMap::new();
    for reference in request.image_references() {
        checkpoint(cancelled)?;
        let lower = reference.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Err(ExportError::ImageLoad {
                reference,
                message: "remote images cannot be embedded in an export".to_string(),
            });
        }
        let load_error = |message: String| ExportError::ImageLoad {
            reference: reference.clone(),
            message,
        };
        let path = resolve_repo_path(&reference);
        let bytes = std::fs::read(&path).map_err(|e| load_error(e.to_string()))?;
        let decoded = image::load_from_memory(&bytes).map_err(|e| load_error(e.to_string()))?;
        let thumb = decoded.resize_to_fill(size, size, FilterType::Triangle).to_rgba8();
        let (w, h) = thumb.dimensions();
        let mut data = thumb.into_raw();
        premultiply_rgba8_in_place(&mut data);
        let pixmap = IntSize::from_wh(w, h)
            .and_then(|size| Pixmap::from_vec(data, size))
            .ok_or_else(|| load_error("image has no pixels".to_string()))?;
        out.insert(reference, pixmap);
    }
    Ok(out)
}

fn draw_avatars(canvas: &mut Pixmap, request: &ExportRequest, avatars: &HashMap<String, Pixmap>, scale: f32) {
    for (round, cards) in request.layout.rounds.iter().enumerate() {
        for (match_index, card) in cards.iter().enumerate() {
            let Some(m) = request.store.rounds.get(round).and_then(|r| r.get(match_index)) else {
                continue;
            };
            for (row, slot) in [m.a.as_ref(), m.b.as_ref()].into_iter().enumerate() {
                let Some(avatar) = slot.and_then(|c| c.image.as_ref()).and_then(|r| avatars.get(r)) else {
                    continue;
                };
                let top = card.y + row as f32 * (card.height / 2.0);
                let x = ((card.x + 6.0) * scale).round() as i32;
                let y = ((top + 4.0) * scale).round() as i32;
                canvas.draw_pixmap(x, y, avatar.as_ref(), &PixmapPaint::default(), Transform::identity(), None);
            }
        }
    }
}

fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        for channel in &mut px[..3] {
            *channel = ((*channel as u16 * a + 127) / 255) as u8;
        }
    }
}

fn encode_png(pixmap: &Pixmap) -> Result<Vec<u8>, ExportError> {
    let mut rgba = Vec::with_capacity(pixmap.data().len());
    for px in pixmap.pixels() {
        let color = px.demultiply();
        rgba.extend_from_slice(&[color.red(), color.green(), color.blue(), color.alpha()]);
    }
    let image = RgbaImage::from_raw(pixmap.width(), pixmap.height(), rgba)
        .ok_or_else(|| ExportError::Encode("pixel buffer does not match canvas size".to_string()))?;
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| ExportError::Encode(e.to_string()))?;
    Ok(bytes)
}

// ── Export job ─────────────────────────────────────────────────────────

/// A single in-flight export. Dropping the job (or calling `cancel`)
/// abandons the render at its next checkpoint; `wait` yields `Ok(None)`
/// for an abandoned render.
pub struct ExportJob {
    cancel: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<Option<Vec<u8>>, ExportError>>,
}

impl ExportJob {
    pub fn spawn<R: Rasterizer>(rasterizer: Arc<R>, request: ExportRequest) -> Self {
        let (tx, mut rx) = oneshot::channel::<()>();
        let handle = tokio::task::spawn_blocking(move || {
            let mut cancelled = || !matches!(rx.try_recv(), Err(TryRecvError::Empty));
            match rasterizer.rasterize(&request, &mut cancelled) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(ExportError::Cancelled) => {
                    info!("export abandoned before completion");
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        });
        ExportJob {
            cancel: Some(tx),
            handle,
        }
    }

    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }

    pub async fn wait(self) -> Result<Option<Vec<u8>>, ExportError> {
        let ExportJob { cancel, handle } = self;
        let result = handle.await;
        drop(cancel);
        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("export task failed: {e}");
                Err(ExportError::Task(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bracket::{build, BracketMode, ScriptedEntropy};
    use image::Rgba;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn store_for(n: u32, mode: BracketMode) -> BracketStore {
        let roster: Vec<Competitor> = (1..=n)
            .map(|id| {
                let mut c = Competitor::new(id, format!("Player {id}"));
                c.subtitle = Some(format!("Club {id}"));
                c
            })
            .collect();
        build(&roster, mode, &mut ScriptedEntropy::default())
    }

    fn default_options() -> ExportOptions {
        ExportOptions::from_config(&AppConfig::default())
    }

    fn never() -> impl FnMut() -> bool {
        || false
    }

    /// Spins until the job is cancelled.
    struct StallingRasterizer {
        saw_cancel: Arc<AtomicBool>,
    }

    impl Rasterizer for StallingRasterizer {
        fn rasterize(
            &self,
            _request: &ExportRequest,
            cancelled: &mut dyn FnMut() -> bool,
        ) -> Result<Vec<u8>, ExportError> {
            for _ in 0..5_000 {
                if cancelled() {
                    self.saw_cancel.store(true, Ordering::SeqCst);
                    return Err(ExportError::Cancelled);
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(Vec::new())
        }
    }

    #[test]
    fn policy_switches_above_fifty_matches() {
        assert_eq!(canvas_policy(50).scale, 2.0);
        assert_eq!(canvas_policy(50).max_dimension, 8_192);
        assert_eq!(canvas_policy(51).scale, 3.0);
        assert_eq!(canvas_policy(51).max_dimension, 16_384);

        // 51 first-round matches fit the large cap at full scale
        let roster: Vec<Competitor> = (1..=102).map(|id| Competitor::new(id, format!("P{id}"))).collect();
        let layout = layout_bracket(&build(&roster, BracketMode::Manual, &mut ScriptedEntropy::default()));
        let (_, height, scale) = canvas_size(&layout, canvas_policy(51));
        assert_eq!(scale, 3.0);
        assert_eq!(height, (layout.height * 3.0).ceil() as u32);
    }

    #[test]
    fn canvas_scale_is_capped_by_max_dimension() {
        let small = layout_bracket(&store_for(8, BracketMode::Manual));
        let (w, h, scale) = canvas_size(&small, canvas_policy(4));
        assert_eq!(scale, 2.0);
        assert_eq!(w, (small.width * 2.0).ceil() as u32);
        assert_eq!(h, (small.height * 2.0).ceil() as u32);

        let big = layout_bracket(&store_for(400, BracketMode::Manual));
        let (w, h, scale) = canvas_size(&big, canvas_policy(200));
        assert!(scale < 3.0);
        assert!(w.max(h) <= 16_384);
    }

    #[test]
    fn empty_store_cannot_be_exported() {
        let err = ExportRequest::new(BracketStore::default(), default_options()).unwrap_err();
        assert!(matches!(err, ExportError::EmptyBracket));
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let body = ExportRequestBody {
            theme: Some("neon".to_string()),
            particles: Some(true),
            ..ExportRequestBody::default()
        };
        let options = default_options().with_overrides(&body);
        assert_eq!(options.theme, "neon");
        assert!(options.particles);
        assert!(options.show_champion);
        assert!(options.vignette);
    }

    #[test]
    fn png_rasterizer_produces_decodable_image() {
        let store = store_for(6, BracketMode::Random);
        let request = ExportRequest::new(store, default_options()).unwrap();
        let bytes = PngRasterizer.rasterize(&request, &mut never()).unwrap();

        let decoded = image::load_from_memory(&bytes).unwrap();
        let (w, h, _) = canvas_size(&request.layout, canvas_policy(3));
        assert_eq!((decoded.width(), decoded.height()), (w, h));
    }

    #[test]
    fn toggles_change_the_output() {
        let store = store_for(4, BracketMode::Random);
        let plain = ExportOptions {
            vignette: false,
            particles: false,
            ..default_options()
        };
        let fancy = ExportOptions {
            vignette: true,
            particles: true,
            ..default_options()
        };
        let a = PngRasterizer
            .rasterize(&ExportRequest::new(store.clone(), plain).unwrap(), &mut never())
            .unwrap();
        let b = PngRasterizer
            .rasterize(&ExportRequest::new(store, fancy).unwrap(), &mut never())
            .unwrap();
        assert_ne!(a, b);
    }

    fn named_store(names: &[&str]) -> BracketStore {
        let roster: Vec<Competitor> = names
            .iter()
            .zip(1..)
            .map(|(name, id)| Competitor::new(id, *name))
            .collect();
        build(&roster, BracketMode::Manual, &mut ScriptedEntropy::default())
    }

    #[test]
    fn svg_carries_names_and_optional_subtitles() {
        let store = store_for(4, BracketMode::Random);
        let request = ExportRequest::new(store.clone(), default_options()).unwrap();
        let svg = bracket_svg(&request);
        assert!(svg.contains(">Player 1</text>"));
        assert!(svg.contains(">Club 1</text>"));
        let champion = request.store.champion().unwrap();
        assert!(svg.contains(&format!(">{}</text>", champion.name)));

        let hidden = ExportOptions {
            show_subtitles: false,
            ..default_options()
        };
        let svg = bracket_svg(&ExportRequest::new(store, hidden).unwrap());
        assert!(svg.contains(">Player 1</text>"));
        assert!(!svg.contains("Club 1"));
    }

    #[test]
    fn svg_text_is_escaped_and_clipped() {
        let long = "A very long competitor name that overflows";
        let store = named_store(&["Tom & <Jerry>", long]);
        let svg = bracket_svg(&ExportRequest::new(store, default_options()).unwrap());
        assert!(svg.contains(">Tom &amp; &lt;Jerry&gt;</text>"));
        assert!(!svg.contains(long));
        assert!(svg.contains(&format!(">{}…</text>", &long[..NAME_CHARS - 1])));
        assert!(usvg::Tree::from_str(&svg, &usvg::Options::default()).is_ok());
    }

    #[test]
    fn different_names_render_differently() {
        if font_database().is_empty() {
            // nothing can draw glyphs on a machine without fonts
            return;
        }
        let render = |names: &[&str]| {
            let request = ExportRequest::new(named_store(names), default_options()).unwrap();
            PngRasterizer.rasterize(&request, &mut never()).unwrap()
        };
        let first = render(&["Alice", "Bobby", "Carol", "Dylan"]);
        let second = render(&["XXXXX", "YYYYY", "ZZZZZ", "WWWWW"]);
        assert_ne!(first, second);
    }

    #[test]
    fn missing_and_remote_images_fail_the_export() {
        let mut store = store_for(2, BracketMode::Manual);
        let mut with_image = store.rounds[0][0].a.clone().unwrap();
        with_image.image = Some("does/not/exist.png".to_string());
        store = store.update_competitor(&with_image);
        let request = ExportRequest::new(store.clone(), default_options()).unwrap();
        let err = PngRasterizer.rasterize(&request, &mut never()).unwrap_err();
        assert!(matches!(err, ExportError::ImageLoad { ref reference, .. } if reference == "does/not/exist.png"));

        with_image.image = Some("https://example.com/a.png".to_string());
        let request = ExportRequest::new(store.update_competitor(&with_image), default_options()).unwrap();
        let err = PngRasterizer.rasterize(&request, &mut never()).unwrap_err();
        assert!(matches!(err, ExportError::ImageLoad { .. }));
    }

    #[test]
    fn local_images_are_embedded() {
        let path = std::env::temp_dir().join(format!("bracket-forge-avatar-{}.png", std::process::id()));
        RgbaImage::from_pixel(8, 8, Rgba([200, 30, 30, 255])).save(&path).unwrap();

        let mut store = store_for(2, BracketMode::Manual);
        let mut with_image = store.rounds[0][0].a.clone().unwrap();
        with_image.image = Some(path.to_string_lossy().to_string());
        store = store.update_competitor(&with_image);

        let request = ExportRequest::new(store, default_options()).unwrap();
        assert_eq!(request.image_references().len(), 1);
        let bytes = PngRasterizer.rasterize(&request, &mut never()).unwrap();
        assert!(image::load_from_memory(&bytes).is_ok());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn rasterizer_stops_when_cancelled() {
        let request = ExportRequest::new(store_for(4, BracketMode::Manual), default_options()).unwrap();
        let err = PngRasterizer.rasterize(&request, &mut || true).unwrap_err();
        assert!(matches!(err, ExportError::Cancelled));
    }

    #[tokio::test]
    async fn job_returns_png_bytes() {
        let request = ExportRequest::new(store_for(5, BracketMode::Random), default_options()).unwrap();
        let job = ExportJob::spawn(Arc::new(PngRasterizer), request);
        let bytes = job.wait().await.unwrap().unwrap();
        assert_eq!(&bytes[..4], &[0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn cancelled_job_yields_nothing() {
        let saw_cancel = Arc::new(AtomicBool::new(false));
        let rasterizer = Arc::new(StallingRasterizer {
            saw_cancel: saw_cancel.clone(),
        });
        let request = ExportRequest::new(store_for(4, BracketMode::Manual), default_options()).unwrap();
        let mut job = ExportJob::spawn(rasterizer, request);
        job.cancel();
        assert!(job.wait().await.unwrap().is_none());
        assert!(saw_cancel.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dropped_job_is_abandoned() {
        let saw_cancel = Arc::new(AtomicBool::new(false));
        let rasterizer = Arc::new(StallingRasterizer {
            saw_cancel: saw_cancel.clone(),
        });
        let request = ExportRequest::new(store_for(4, BracketMode::Manual), default_options()).unwrap();
        drop(ExportJob::spawn(rasterizer, request));

        for _ in 0..200 {
            if saw_cancel.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(saw_cancel.load(Ordering::SeqCst));
    }

    #[test]
    fn file_names_carry_a_timestamp() {
        let name = export_file_name(Local::now());
        assert!(name.starts_with("bracket-"));
        assert!(name.ends_with(".png"));
    }
}
