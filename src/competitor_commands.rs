use crate::bracket::Competitor;
use crate::types::{CompetitorEdit, CompetitorImage, NewCompetitor, SharedSession};
use tracing::info;

/// Get the roster in insertion order
pub fn list_competitors(session: &SharedSession) -> Result<Vec<Competitor>, String> {
    let guard = session.lock().map_err(|e| e.to_string())?;
    Ok(guard.competitors.all().to_vec())
}

/// Add a competitor to the roster
pub fn add_competitor(session: &SharedSession, payload: NewCompetitor) -> Result<Competitor, String> {
    let mut guard = session.lock().map_err(|e| e.to_string())?;
    let added = guard
        .competitors
        .add(&payload.name, payload.subtitle.as_deref())?;
    info!(competitor = added.id, name = %added.name, "competitor added");
    Ok(added)
}

/// Edit name/subtitle on the roster (the current bracket keeps its copy)
pub fn update_competitor(
    session: &SharedSession,
    id: u32,
    payload: CompetitorEdit,
) -> Result<Competitor, String> {
    let mut guard = session.lock().map_err(|e| e.to_string())?;
    guard
        .competitors
        .update(id, payload.name.as_deref(), payload.subtitle.as_deref())
}

pub fn set_competitor_image(
    session: &SharedSession,
    id: u32,
    payload: CompetitorImage,
) -> Result<Competitor, String> {
    let mut guard = session.lock().map_err(|e| e.to_string())?;
    guard.competitors.set_image(id, payload.image.as_deref())
}

pub fn remove_competitor(session: &SharedSession, id: u32) -> Result<Competitor, String> {
    let mut guard = session.lock().map_err(|e| e.to_string())?;
    let removed = guard.competitors.remove(id)?;
    info!(competitor = id, "competitor removed");
    Ok(removed)
}

/// Empty the roster. The current bracket is left as it is.
pub fn clear_competitors(session: &SharedSession) -> Result<(), String> {
    let mut guard = session.lock().map_err(|e| e.to_string())?;
    let count = guard.competitors.len();
    guard.competitors.clear();
    info!(count, "roster cleared");
    Ok(())
}
