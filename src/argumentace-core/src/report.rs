//! Paginated debate report.
//!
//! [`render`] lays a session out on A4 pages as positioned elements. Every
//! block is measured from its wrapped line count before it is placed, so a
//! block either fits on the current page or moves to the next one. Only a
//! block taller than a whole page is split, at line boundaries, into
//! continuation boxes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::{DebateSession, DebateTurn, Speaker, VerdictResult};

/// A4 in points.
pub const PAGE_WIDTH: f32 = 595.28;
pub const PAGE_HEIGHT: f32 = 841.89;
pub const MARGIN: f32 = 40.0;

const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;
const USABLE_HEIGHT: f32 = PAGE_HEIGHT - 2.0 * MARGIN;
const BOX_PADDING: f32 = 6.0;
const BLOCK_GAP: f32 = 8.0;
const FEEDBACK_INDENT: f32 = 20.0;
const LINE_SPACING: f32 = 1.4;
/// Average glyph advance as a fraction of the font size.
const GLYPH_WIDTH: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontWeight {
    Regular,
    Bold,
    Italic,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FontStyle {
    pub size: f32,
    pub weight: FontWeight,
}

impl FontStyle {
    const fn new(size: f32, weight: FontWeight) -> Self {
        Self { size, weight }
    }

    fn line_height(&self) -> f32 {
        self.size * LINE_SPACING
    }
}

const TITLE: FontStyle = FontStyle::new(20.0, FontWeight::Bold);
const HEADING: FontStyle = FontStyle::new(14.0, FontWeight::Bold);
const BODY: FontStyle = FontStyle::new(10.0, FontWeight::Regular);
const LABEL: FontStyle = FontStyle::new(9.0, FontWeight::Bold);
const META: FontStyle = FontStyle::new(9.0, FontWeight::Italic);

/// Fill used for a box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoxStyle {
    UserTurn,
    AiTurn,
    Feedback,
    Banner,
    Clash,
}

/// A positioned drawing instruction. `y` grows downwards from the top edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Element {
    SetFont(FontStyle),
    Text {
        x: f32,
        y: f32,
        text: String,
    },
    Rect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        style: BoxStyle,
        /// Set on every part of a split block except the last.
        continues: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub number: usize,
    pub elements: Vec<Element>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub title: String,
    pub file_name: String,
    pub pages: Vec<Page>,
}

impl ReportDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// The text of every page in drawing order.
    pub fn to_plain_text(&self) -> String {
        let mut out = String::new();
        for page in &self.pages {
            out.push_str(&format!("--- Page {} ---\n", page.number));
            for element in &page.elements {
                if let Element::Text { text, .. } = element {
                    out.push_str(text);
                    out.push('\n');
                }
            }
            out.push('\n');
        }
        out
    }
}

/// Lay out a report for `session`. Pure: the same inputs give the same document.
pub fn render(session: &DebateSession, generated_on: DateTime<Utc>) -> ReportDocument {
    let mut layout = Layout::new();

    layout.paragraph("ArgumentAce Debate Report", TITLE, 0.0);
    layout.paragraph(
        &format!("Generated on {}", generated_on.format("%Y-%m-%d %H:%M UTC")),
        META,
        0.0,
    );
    layout.gap(BLOCK_GAP);

    layout.paragraph(&format!("Topic: {}", session.topic), HEADING, 0.0);
    layout.paragraph(
        &format!("Reasoning skill: {}", session.reasoning_skill),
        BODY,
        0.0,
    );
    layout.paragraph(
        &format!("Format: {}", session.format.format().display_name()),
        BODY,
        0.0,
    );
    if let Some(ref role) = session.current_role {
        layout.paragraph(&format!("Your role: {}", role), BODY, 0.0);
    }
    if let Some(secs) = session.prep_time_used_secs {
        layout.paragraph(
            &format!("Preparation time used: {}:{:02}", secs / 60, secs % 60),
            BODY,
            0.0,
        );
    }

    if let Some(ref research) = session.research_bundle {
        layout.section("Research");
        layout.list("Arguments for", &research.pro_points);
        layout.list("Arguments against", &research.con_points);
        if let Some(ref facts) = research.key_facts {
            layout.list("Key facts", facts);
        }
    }

    layout.section("Transcript");
    if session.debate_log.is_empty() {
        layout.paragraph("No turns recorded.", META, 0.0);
    }
    for turn in &session.debate_log {
        render_turn(&mut layout, turn);
    }

    if let Some(ref verdict) = session.verdict {
        render_verdict(&mut layout, verdict);
    }

    ReportDocument {
        title: format!("ArgumentAce Debate Report: {}", session.topic),
        file_name: file_name(&session.topic),
        pages: layout.finish(),
    }
}

fn render_turn(layout: &mut Layout, turn: &DebateTurn) {
    let style = match turn.speaker {
        Speaker::User => BoxStyle::UserTurn,
        Speaker::Ai => BoxStyle::AiTurn,
    };
    let label = format!("{} at {}", turn.speaker_label(), turn.timestamp.format("%H:%M:%S"));
    layout.boxed(0.0, &label, &turn.text, style);

    if let Some(ref feedback) = turn.feedback {
        let mut body = feedback.feedback.clone();
        for (name, items) in [
            ("Fallacies", &feedback.fallacies),
            ("Persuasive techniques", &feedback.persuasive_techniques),
            ("Counterpoints to anticipate", &feedback.counterpoints),
        ] {
            if !items.is_empty() {
                body.push_str(&format!("\n{}: {}", name, items.join("; ")));
            }
        }
        layout.boxed(FEEDBACK_INDENT, "Coach feedback", &body, BoxStyle::Feedback);
    }
}

fn render_verdict(layout: &mut Layout, verdict: &VerdictResult) {
    layout.section("Jury Verdict");
    layout.boxed(
        0.0,
        &format!("Winner: {}", verdict.winner().label()),
        &format!("Final score: {:+}", verdict.final_score()),
        BoxStyle::Banner,
    );
    if !verdict.overall_assessment().is_empty() {
        layout.paragraph(verdict.overall_assessment(), BODY, 0.0);
    }

    layout.paragraph("Clash breakdown", LABEL, 0.0);
    for clash in verdict.clashes() {
        let label = format!(
            "{}: {} ({:+})",
            clash.point,
            clash.winner.label(),
            clash.winner_score
        );
        let mut body = clash.summary.clone();
        if !clash.reasoning.is_empty() {
            body.push_str(&format!("\nReasoning: {}", clash.reasoning));
        }
        layout.boxed(0.0, &label, &body, BoxStyle::Clash);
    }

    layout.list("Your strengths", verdict.user_strengths());
    layout.list("Your weaknesses", verdict.user_weaknesses());
    layout.list("AI strengths", verdict.ai_strengths());
    layout.list("AI weaknesses", verdict.ai_weaknesses());
    if let Some(advice) = verdict.advice_for_user() {
        layout.paragraph("Advice", LABEL, 0.0);
        layout.paragraph(advice, BODY, 0.0);
    }
}

/// Suggested file name (without extension) for a report on `topic`.
pub fn file_name(topic: &str) -> String {
    let sanitized: String = topic
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(50)
        .collect();

    format!("ArgumentAce - {}", sanitized.trim())
}

fn wrap_lines(text: &str, width: f32, font: FontStyle) -> Vec<String> {
    let columns = ((width / (font.size * GLYPH_WIDTH)).floor() as usize).max(1);
    textwrap::wrap(text, columns)
        .into_iter()
        .map(|line| line.into_owned())
        .collect()
}

fn box_height(label_lines: usize, body_lines: usize) -> f32 {
    label_lines as f32 * LABEL.line_height()
        + 2.0 * BOX_PADDING
        + body_lines as f32 * BODY.line_height()
}

/// Running cursor over a list of pages.
struct Layout {
    pages: Vec<Page>,
    cursor: f32,
    font: Option<FontStyle>,
}

impl Layout {
    fn new() -> Self {
        Self {
            pages: vec![Page {
                number: 1,
                elements: Vec::new(),
            }],
            cursor: 0.0,
            font: None,
        }
    }

    fn finish(self) -> Vec<Page> {
        self.pages
    }

    fn push(&mut self, element: Element) {
        if let Some(page) = self.pages.last_mut() {
            page.elements.push(element);
        }
    }

    fn set_font(&mut self, font: FontStyle) {
        if self.font != Some(font) {
            self.font = Some(font);
            self.push(Element::SetFont(font));
        }
    }

    fn new_page(&mut self) {
        let number = self.pages.len() + 1;
        self.pages.push(Page {
            number,
            elements: Vec::new(),
        });
        self.cursor = 0.0;
        if let Some(font) = self.font {
            self.push(Element::SetFont(font));
        }
    }

    /// Start a new page unless `height` fits below the cursor.
    fn ensure_room(&mut self, height: f32) {
        if self.cursor > 0.0 && self.cursor + height > USABLE_HEIGHT {
            self.new_page();
        }
    }

    fn gap(&mut self, height: f32) {
        self.cursor = (self.cursor + height).min(USABLE_HEIGHT);
    }

    fn text(&mut self, x: f32, text: String) {
        self.push(Element::Text {
            x: MARGIN + x,
            y: MARGIN + self.cursor,
            text,
        });
    }

    fn paragraph(&mut self, text: &str, font: FontStyle, indent: f32) {
        let lines = wrap_lines(text, CONTENT_WIDTH - indent, font);
        let line_height = font.line_height();
        let height = lines.len() as f32 * line_height;

        if height <= USABLE_HEIGHT {
            self.ensure_room(height);
        } else {
            self.ensure_room(line_height);
        }
        self.set_font(font);
        for line in lines {
            self.ensure_room(line_height);
            self.text(indent, line);
            self.cursor += line_height;
        }
        self.gap(BLOCK_GAP / 2.0);
    }

    /// A heading kept on the same page as at least one body line.
    fn section(&mut self, title: &str) {
        self.gap(BLOCK_GAP);
        self.ensure_room(HEADING.line_height() + BODY.line_height());
        self.paragraph(title, HEADING, 0.0);
    }

    fn list(&mut self, title: &str, items: &[String]) {
        if items.is_empty() {
            return;
        }
        self.ensure_room(LABEL.line_height() + BODY.line_height());
        self.paragraph(title, LABEL, 0.0);
        for item in items {
            self.paragraph(&format!("- {}", item), BODY, 10.0);
        }
    }

    /// A labelled box around wrapped body text.
    fn boxed(&mut self, indent: f32, label: &str, body: &str, style: BoxStyle) {
        let width = CONTENT_WIDTH - indent;
        let inner = width - 2.0 * BOX_PADDING;
        let lines = wrap_lines(body, inner, BODY);
        let label_lines = wrap_lines(label, inner, LABEL);
        let height = box_height(label_lines.len(), lines.len());

        if height <= USABLE_HEIGHT {
            self.ensure_room(height);
            self.draw_box(indent, width, &label_lines, &lines, style, false);
            return;
        }

        if self.cursor > 0.0 {
            self.new_page();
        }
        let continued = wrap_lines(&format!("{} (continued)", label), inner, LABEL);
        let chrome = box_height(label_lines.len().max(continued.len()), 0);
        let per_page = (((USABLE_HEIGHT - chrome) / BODY.line_height()).floor() as usize).max(1);
        let parts: Vec<&[String]> = lines.chunks(per_page).collect();
        let last = parts.len().saturating_sub(1);
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                self.new_page();
            }
            let part_label = if i == 0 { &label_lines } else { &continued };
            self.draw_box(indent, width, part_label, part, style, i < last);
        }
    }

    fn draw_box(
        &mut self,
        indent: f32,
        width: f32,
        label: &[String],
        lines: &[String],
        style: BoxStyle,
        continues: bool,
    ) {
        let height = box_height(label.len(), lines.len());
        self.push(Element::Rect {
            x: MARGIN + indent,
            y: MARGIN + self.cursor,
            width,
            height,
            style,
            continues,
        });

        let top = self.cursor;
        self.cursor += BOX_PADDING;
        self.set_font(LABEL);
        for line in label {
            self.text(indent + BOX_PADDING, line.clone());
            self.cursor += LABEL.line_height();
        }
        self.set_font(BODY);
        for line in lines {
            self.text(indent + BOX_PADDING, line.clone());
            self.cursor += BODY.line_height();
        }
        self.cursor = top + height + BLOCK_GAP;
    }
}
