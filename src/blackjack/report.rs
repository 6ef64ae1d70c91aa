use std::path::Path;

use plotlib::{
    page::Page,
    repr::Plot,
    style::{LineJoin, LineStyle, PointMarker, PointStyle},
    view::ContinuousView,
};
use prettytable::{Cell, Row, Table};

use crate::blackjack::{Action, Blackjack, State, ACE};
use crate::error::{Error, Result};
use crate::solver::agent::Agent;

const HARD_COUNTS: std::ops::RangeInclusive<u32> = 4..=20;
const SOFT_COUNTS: std::ops::RangeInclusive<u32> = 12..=20;
const DEALER_CARDS: std::ops::RangeInclusive<u32> = 2..=ACE;

fn dealer_label(card: u32) -> String {
    match card {
        10 => "T".to_string(),
        ACE => "A".to_string(),
        v => format!("{}", v),
    }
}

fn header() -> Row {
    let mut cells = vec![Cell::new("")];
    cells.extend(DEALER_CARDS.map(|d| Cell::new(&dealer_label(d))));
    Row::new(cells)
}

// Greedy action for every player count (rows) and dealer card (columns).
// Cells stay empty for states the agent has not estimated yet.
pub fn policy_table(agent: &Agent<Blackjack>, soft: bool) -> Table {
    let counts = if soft { SOFT_COUNTS } else { HARD_COUNTS };
    let mut table = Table::new();
    table.add_row(header());
    for count in counts {
        let mut cells = vec![Cell::new(&format!("{}", count))];
        for dealer in DEALER_CARDS {
            let state = State::new(count, dealer, soft as u32);
            cells.push(Cell::new(match agent.preferred_action(&state) {
                Some(Action::Hit) => "H",
                Some(Action::Stay) => "S",
                None => "",
            }));
        }
        table.add_row(Row::new(cells));
    }
    table
}

pub fn print_policy(agent: &Agent<Blackjack>) {
    println!("--> Hard");
    policy_table(agent, false).printstd();
    println!("--> Soft");
    policy_table(agent, true).printstd();
}

// Hit and Stay estimates of a hard `count` against every dealer card.
pub fn probe_table(agent: &Agent<Blackjack>, count: u32) -> Table {
    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("State"),
        Cell::new("Hit"),
        Cell::new("Stay"),
    ]));
    for dealer in DEALER_CARDS {
        let state = State::new(count, dealer, 0);
        let estimate = |action| {
            agent
                .estimate(&state, action)
                .map(|e| e.to_string())
                .unwrap_or_default()
        };
        table.add_row(Row::new(vec![
            Cell::new(&state.to_string()),
            Cell::new(&estimate(Action::Hit)),
            Cell::new(&estimate(Action::Stay)),
        ]));
    }
    table
}

// Saves (training progress in %, mean return) points as an SVG line plot.
pub fn save_learning_curve(points: &[(f64, f64)], path: &Path) -> Result<()> {
    let plot = Plot::new(points.to_vec())
        .line_style(LineStyle::new().linejoin(LineJoin::Round))
        .point_style(PointStyle::new().marker(PointMarker::Circle));
    let view = ContinuousView::new()
        .add(plot)
        .x_range(0.0, 100.0)
        .y_range(-1.0, 1.0)
        .x_label("Training progress (%)")
        .y_label("Mean greedy return");
    Page::single(&view)
        .save(path)
        .map_err(|e| Error::Plot(e.to_string()))
}
