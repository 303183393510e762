// 📈 Charts - text bar charts rendered from aggregate tables
//
// Only the concentration and summary tables feed these; a chart never sees
// record-level data. Rendering goes through ratatui's BarChart into an
// off-screen Buffer, which is then flattened to plain text.

use crate::concentration::ConcentrationAggregate;
use crate::report::ReportSet;
use ratatui::{
    buffer::Buffer,
    layout::{Direction, Rect},
    style::{Color, Style},
    text::Line,
    widgets::{Bar, BarChart, BarGroup, Block, Borders, Widget},
};
use std::collections::BTreeMap;

const HORIZONTAL_WIDTH: u16 = 72;
const VERTICAL_HEIGHT: u16 = 16;
const BAR_WIDTH: u16 = 9;

/// Most groups (or bars, for single-group charts) drawn in one chart; the
/// rest are dropped smallest-first and the title says so.
pub const MAX_GROUPS: usize = 30;

// ============================================================================
// CHART DATA
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ChartGroup {
    pub label: Option<String>,
    pub bars: Vec<(String, u64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    pub file_name: &'static str,
    pub title: String,
    pub direction: Direction,
    pub groups: Vec<ChartGroup>,
}

impl ChartSeries {
    fn bar_count(&self) -> usize {
        self.groups.iter().map(|g| g.bars.len()).sum()
    }
}

/// Keep the `limit` heaviest items, in their original order. Ties go to the
/// earlier item.
fn keep_largest<T>(items: Vec<T>, limit: usize, weight: impl Fn(&T) -> u64) -> Vec<T> {
    if items.len() <= limit {
        return items;
    }
    let mut ranked: Vec<(usize, u64)> = items.iter().map(&weight).enumerate().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let mut keep: Vec<bool> = vec![false; items.len()];
    for (idx, _) in ranked.into_iter().take(limit) {
        keep[idx] = true;
    }
    items
        .into_iter()
        .zip(keep)
        .filter_map(|(item, kept)| kept.then_some(item))
        .collect()
}

fn capped_title(title: &str, shown: usize, total: usize) -> String {
    if shown < total {
        format!("{} (top {} of {})", title, shown, total)
    } else {
        title.to_string()
    }
}

/// Mismatched groups of one concentration table, one bar each
fn mismatched_bars(table: &[ConcentrationAggregate]) -> Vec<(String, u64)> {
    table
        .iter()
        .filter(|a| a.mismatch)
        .map(|a| (a.key.display(), a.num_loans as u64))
        .collect()
}

fn single_group(
    file_name: &'static str,
    title: &str,
    direction: Direction,
    bars: Vec<(String, u64)>,
) -> Option<ChartSeries> {
    if bars.is_empty() {
        return None;
    }
    let total = bars.len();
    let bars = keep_largest(bars, MAX_GROUPS, |(_, count)| *count);

    Some(ChartSeries {
        file_name,
        title: capped_title(title, bars.len(), total),
        direction,
        groups: vec![ChartGroup { label: None, bars }],
    })
}

/// Mismatched loans per cost center, ascending. Loans without a cost center
/// are left out of this chart.
pub fn mismatch_by_center(reports: &ReportSet) -> Option<ChartSeries> {
    let mut bars: Vec<(String, u64)> = reports
        .concentration
        .by_cost_center
        .iter()
        .filter(|a| a.mismatch && !a.key.is_missing())
        .map(|a| (a.key.display(), a.num_loans as u64))
        .collect();
    bars.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    single_group(
        "mismatch_by_center",
        "Mismatched loans by cost center",
        Direction::Horizontal,
        bars,
    )
}

/// Mismatch vs ok per cost center. Drawn whenever the summary table has rows,
/// even if nothing mismatched.
pub fn summary_mismatch_by_center(reports: &ReportSet) -> Option<ChartSeries> {
    if reports.summary.is_empty() {
        return None;
    }

    // center -> (ok, mismatch); BTreeMap keeps the missing center last
    let mut by_center = BTreeMap::new();
    for s in &reports.summary {
        let entry = by_center.entry(s.cost_center.clone()).or_insert((0u64, 0u64));
        if s.mismatch {
            entry.1 += s.num_loans as u64;
        } else {
            entry.0 += s.num_loans as u64;
        }
    }

    let groups: Vec<ChartGroup> = by_center
        .into_iter()
        .map(|(center, (ok, mismatched))| ChartGroup {
            label: Some(center.display()),
            bars: vec![("ok".to_string(), ok), ("mismatch".to_string(), mismatched)],
        })
        .collect();

    let total = groups.len();
    let groups = keep_largest(groups, MAX_GROUPS, |g| {
        g.bars.iter().find(|(label, _)| label == "mismatch").map_or(0, |(_, n)| *n)
    });

    Some(ChartSeries {
        file_name: "summary_mismatch_by_center",
        title: capped_title("Loans by cost center: mismatch vs ok", groups.len(), total),
        direction: Direction::Vertical,
        groups,
    })
}

pub fn mismatch_by_risk_segment(reports: &ReportSet) -> Option<ChartSeries> {
    single_group(
        "mismatch_by_risk_segment",
        "Mismatched loans by risk segment",
        Direction::Vertical,
        mismatched_bars(&reports.concentration.by_risk_segment),
    )
}

pub fn mismatch_by_pd_bucket(reports: &ReportSet) -> Option<ChartSeries> {
    single_group(
        "mismatch_by_pd_bucket",
        "Mismatched loans by PD bucket",
        Direction::Vertical,
        mismatched_bars(&reports.concentration.by_pd_bucket),
    )
}

// ============================================================================
// RENDERING
// ============================================================================

#[derive(Debug, Clone)]
pub struct RenderedChart {
    pub file_name: &'static str,
    pub title: String,
    pub lines: Vec<String>,
}

impl RenderedChart {
    pub fn to_text(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}

fn clamp_u16(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

/// Buffer area for a series. Sized in u32 and clamped; series are capped at
/// MAX_GROUPS so the clamp never bites in practice.
fn chart_area(series: &ChartSeries) -> Rect {
    let bars = u32::try_from(series.bar_count()).unwrap_or(u32::MAX);
    let groups = u32::try_from(series.groups.len()).unwrap_or(u32::MAX);
    let title = u32::try_from(series.title.chars().count()).unwrap_or(u32::MAX).saturating_add(2);

    let (width, height) = match series.direction {
        Direction::Horizontal => (
            u32::from(HORIZONTAL_WIDTH).max(title),
            bars.saturating_add(groups).saturating_add(2),
        ),
        Direction::Vertical => (
            bars.saturating_mul(u32::from(BAR_WIDTH) + 1)
                .saturating_add(groups.saturating_mul(3))
                .saturating_add(2)
                .max(24)
                .max(title),
            u32::from(VERTICAL_HEIGHT),
        ),
    };

    Rect::new(0, 0, clamp_u16(width), clamp_u16(height))
}

pub fn render(series: &ChartSeries) -> RenderedChart {
    let area = chart_area(series);
    let (bar_width, bar_gap, group_gap) = match series.direction {
        Direction::Horizontal => (1, 0, 1),
        Direction::Vertical => (BAR_WIDTH, 1, 3),
    };

    let groups: Vec<(Option<String>, Vec<Bar>)> = series
        .groups
        .iter()
        .map(|g| {
            let bars = g
                .bars
                .iter()
                .map(|(label, value)| {
                    let color = if label == "ok" { Color::Green } else { Color::Red };
                    Bar::default()
                        .value(*value)
                        .label(Line::from(label.clone()))
                        .text_value(value.to_string())
                        .style(Style::default().fg(color))
                })
                .collect();
            (g.label.clone(), bars)
        })
        .collect();

    let mut chart = BarChart::default()
        .block(Block::default().title(series.title.as_str()).borders(Borders::ALL))
        .direction(series.direction)
        .bar_width(bar_width)
        .bar_gap(bar_gap)
        .group_gap(group_gap);

    for (label, bars) in &groups {
        let mut group = BarGroup::default().bars(bars);
        if let Some(label) = label {
            group = group.label(Line::from(label.clone()));
        }
        chart = chart.data(group);
    }

    let mut buf = Buffer::empty(area);
    chart.render(area, &mut buf);

    let lines = (area.top()..area.bottom())
        .map(|y| {
            let row: String = (area.left()..area.right()).map(|x| buf.get(x, y).symbol()).collect();
            row.trim_end().to_string()
        })
        .collect();

    RenderedChart {
        file_name: series.file_name,
        title: series.title.clone(),
        lines,
    }
}

/// Every chart that has something to show, in a fixed order
pub fn render_all(reports: &ReportSet) -> Vec<RenderedChart> {
    let series = [
        mismatch_by_center(reports),
        summary_mismatch_by_center(reports),
        mismatch_by_risk_segment(reports),
        mismatch_by_pd_bucket(reports),
    ];

    let rendered: Vec<RenderedChart> = series.iter().flatten().map(render).collect();
    log::debug!("rendered {} charts", rendered.len());
    rendered
}
