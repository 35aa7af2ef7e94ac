use serde::Serialize;

use crate::bracket::BracketStore;

pub const CARD_WIDTH: f32 = 220.0;
pub const CARD_HEIGHT: f32 = 64.0;
pub const CHAMPION_HEIGHT: f32 = 48.0;
pub const COLUMN_GAP: f32 = 56.0;
pub const ROW_GAP: f32 = 16.0;
pub const MARGIN: f32 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center_y(&self) -> f32 {
        self.y + self.height / 2.0
    }
}

/// Axis-aligned polyline from a feeding card to the card it feeds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Connector {
    pub points: Vec<[f32; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketLayout {
    pub width: f32,
    pub height: f32,
    /// Card rectangles indexed like `BracketStore::rounds`
    pub rounds: Vec<Vec<Rect>>,
    pub connectors: Vec<Connector>,
    pub champion: Option<Rect>,
    /// Link from the final match to the champion card
    pub champion_link: Option<Connector>,
}

impl BracketLayout {
    pub fn card(&self, round: usize, match_index: usize) -> Option<&Rect> {
        self.rounds.get(round)?.get(match_index)
    }
}

pub fn layout_bracket(store: &BracketStore) -> BracketLayout {
    let mut rounds: Vec<Vec<Rect>> = Vec::with_capacity(store.rounds.len());
    let mut connectors = Vec::new();

    for (k, matches) in store.rounds.iter().enumerate() {
        let x = MARGIN + k as f32 * (CARD_WIDTH + COLUMN_GAP);
        let mut cards = Vec::with_capacity(matches.len());
        for j in 0..matches.len() {
            let y = match rounds.last() {
                None => MARGIN + j as f32 * (CARD_HEIGHT + ROW_GAP),
                Some(prev) => {
                    let center = feeder_center(prev, j).unwrap_or(MARGIN + CARD_HEIGHT / 2.0);
                    center - CARD_HEIGHT / 2.0
                }
            };
            let card = Rect {
                x,
                y,
                width: CARD_WIDTH,
                height: CARD_HEIGHT,
            };
            if let Some(prev) = rounds.last() {
                for feeder in [prev.get(2 * j), prev.get(2 * j + 1)].into_iter().flatten() {
                    connectors.push(elbow(feeder, &card));
                }
            }
            cards.push(card);
        }
        rounds.push(cards);
    }

    let champion = rounds.last().and_then(|last| last.first()).map(|final_card| Rect {
        x: final_card.right() + COLUMN_GAP,
        y: final_card.center_y() - CHAMPION_HEIGHT / 2.0,
        width: CARD_WIDTH,
        height: CHAMPION_HEIGHT,
    });
    let champion_link = match (rounds.last().and_then(|last| last.first()), champion) {
        (Some(final_card), Some(champion)) => Some(Connector {
            points: vec![
                [final_card.right(), final_card.center_y()],
                [champion.x, champion.center_y()],
            ],
        }),
        _ => None,
    };

    let first_round = store.first_round_matches() as f32;
    let height = if first_round > 0.0 {
        MARGIN * 2.0 + first_round * CARD_HEIGHT + (first_round - 1.0) * ROW_GAP
    } else {
        MARGIN * 2.0
    };
    let width = champion.map(|rect| rect.right() + MARGIN).unwrap_or(MARGIN * 2.0);

    BracketLayout {
        width,
        height,
        rounds,
        connectors,
        champion,
        champion_link,
    }
}

fn feeder_center(prev: &[Rect], match_index: usize) -> Option<f32> {
    let a = prev.get(2 * match_index)?;
    match prev.get(2 * match_index + 1) {
        Some(b) => Some((a.center_y() + b.center_y()) / 2.0),
        None => Some(a.center_y()),
    }
}

fn elbow(from: &Rect, to: &Rect) -> Connector {
    let mid_x = from.right() + COLUMN_GAP / 2.0;
    Connector {
        points: vec![
            [from.right(), from.center_y()],
            [mid_x, from.center_y()],
            [mid_x, to.center_y()],
            [to.x, to.center_y()],
        ],
    }
}
