use std::collections::HashMap;

use crate::bracket::Competitor;
use crate::types::MAX_COMPETITORS;

/// CompetitorList is the flat roster the bracket is generated from.
/// Bracket generation takes a snapshot; edits made here do not reach an
/// existing bracket until it is generated again.
#[derive(Debug, Default, Clone)]
pub struct CompetitorList {
    /// Competitors in insertion order
    competitors: Vec<Competitor>,
    /// Index from competitor id to position in `competitors`
    positions: HashMap<u32, usize>,
    /// Next id handed out by `add`; ids are never reused within a session
    next_id: u32,
}

impl CompetitorList {
    pub fn new() -> Self {
        CompetitorList {
            next_id: 1,
            ..CompetitorList::default()
        }
    }

    pub fn len(&self) -> usize {
        self.competitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.competitors.is_empty()
    }

    pub fn all(&self) -> &[Competitor] {
        &self.competitors
    }

    pub fn get(&self, id: u32) -> Option<&Competitor> {
        self.positions.get(&id).map(|&idx| &self.competitors[idx])
    }

    /// Add a competitor with a fresh id
    pub fn add(&mut self, name: &str, subtitle: Option<&str>) -> Result<Competitor, String> {
        if self.competitors.len() >= MAX_COMPETITORS {
            return Err(format!("Max competitors ({MAX_COMPETITORS}) reached."));
        }
        let name = normalize_display_text(name)
            .ok_or_else(|| "Competitor name cannot be empty.".to_string())?;
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        let competitor = Competitor {
            id,
            name,
            subtitle: subtitle.and_then(normalize_display_text),
            image: None,
        };
        self.positions.insert(id, self.competitors.len());
        self.competitors.push(competitor.clone());
        Ok(competitor)
    }

    /// Update name and subtitle. A `None` name keeps the current one;
    /// a blank subtitle clears it.
    pub fn update(
        &mut self,
        id: u32,
        name: Option<&str>,
        subtitle: Option<&str>,
    ) -> Result<Competitor, String> {
        let idx = self.position(id)?;
        let competitor = &mut self.competitors[idx];
        if let Some(raw) = name {
            competitor.name = normalize_display_text(raw)
                .ok_or_else(|| "Competitor name cannot be empty.".to_string())?;
        }
        if let Some(raw) = subtitle {
            competitor.subtitle = normalize_display_text(raw);
        }
        Ok(competitor.clone())
    }

    /// Assign or clear the image reference
    pub fn set_image(&mut self, id: u32, image: Option<&str>) -> Result<Competitor, String> {
        let idx = self.position(id)?;
        let competitor = &mut self.competitors[idx];
        competitor.image = image.and_then(normalize_display_text);
        Ok(competitor.clone())
    }

    pub fn remove(&mut self, id: u32) -> Result<Competitor, String> {
        let idx = self.position(id)?;
        let removed = self.competitors.remove(idx);
        self.reindex();
        Ok(removed)
    }

    /// Clear all competitors (ids keep counting up)
    pub fn clear(&mut self) {
        self.competitors.clear();
        self.positions.clear();
    }

    fn position(&self, id: u32) -> Result<usize, String> {
        self.positions
            .get(&id)
            .copied()
            .ok_or_else(|| format!("Competitor {id} not found."))
    }

    fn reindex(&mut self) {
        self.positions = self
            .competitors
            .iter()
            .enumerate()
            .map(|(idx, c)| (c.id, idx))
            .collect();
    }
}

pub fn normalize_display_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}
