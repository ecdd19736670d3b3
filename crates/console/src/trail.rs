use std::path::Path;

use harvestar_geom::{project_xy, Viewport, X_RANGE, Y_RANGE};
use svg::node::element::path::Data;
use svg::node::element::{Circle, Line, Path as SvgPath, Rectangle};
use svg::Document;

use crate::history::{HistorySample, TelemetryHistory};

pub const DEFAULT_VIEWPORT: Viewport = Viewport::new(300.0, 200.0);

// Grid spacing, in cm.
const GRID: f64 = 10.0;

fn grid_line(from: (f64, f64), to: (f64, f64), viewport: Viewport) -> Line {
    let a = project_xy(from.0, from.1, viewport);
    let b = project_xy(to.0, to.1, viewport);
    Line::new()
        .set("x1", a.x)
        .set("y1", a.y)
        .set("x2", b.x)
        .set("y2", b.y)
        .set("stroke", "lightgray")
        .set("stroke-width", 0.5)
}

/// Draws the workspace from above: the recent trail as fading dots joined by
/// a line, and the live position on top.
pub fn render_trail(
    history: &TelemetryHistory,
    live: Option<&HistorySample>,
    viewport: Viewport,
) -> Document {
    let mut document = Document::new()
        .set("viewBox", (0.0, 0.0, viewport.width, viewport.height))
        .add(
            Rectangle::new()
                .set("width", viewport.width)
                .set("height", viewport.height)
                .set("fill", "none")
                .set("stroke", "gray"),
        );

    let (x0, x1) = (*X_RANGE.start(), *X_RANGE.end());
    let (y0, y1) = (*Y_RANGE.start(), *Y_RANGE.end());
    let mut x = x0 + GRID;
    while x < x1 {
        document = document.add(grid_line((x, y0), (x, y1), viewport));
        x += GRID;
    }
    let mut y = y0 + GRID;
    while y < y1 {
        document = document.add(grid_line((x0, y), (x1, y), viewport));
        y += GRID;
    }

    let points: Vec<_> = history.current().map(|s| s.project(viewport)).collect();
    if let Some((first, rest)) = points.split_first() {
        let mut data = Data::new().move_to((first.x, first.y));
        for p in rest {
            data = data.line_to((p.x, p.y));
        }
        document = document.add(
            SvgPath::new()
                .set("fill", "none")
                .set("stroke", "lightblue")
                .set("stroke-width", 1)
                .set("d", data),
        );
    }

    let n = points.len();
    for (i, p) in points.iter().enumerate() {
        // Oldest is faintest.
        let opacity = (i + 1) as f64 / n as f64;
        document = document.add(
            Circle::new()
                .set("cx", p.x)
                .set("cy", p.y)
                .set("r", 3.0)
                .set("fill", "blue")
                .set("fill-opacity", opacity),
        );
    }

    if let Some(live) = live {
        let p = live.project(viewport);
        document = document.add(
            Circle::new()
                .set("cx", p.x)
                .set("cy", p.y)
                .set("r", 5.0)
                .set("fill", "red"),
        );
    }
    document
}

pub fn write_trail(
    path: &Path,
    history: &TelemetryHistory,
    live: Option<&HistorySample>,
) -> anyhow::Result<()> {
    svg::save(path, &render_trail(history, live, DEFAULT_VIEWPORT))?;
    Ok(())
}
