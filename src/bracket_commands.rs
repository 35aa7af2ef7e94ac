use crate::bracket::{build, BracketError, BracketMode, RandEntropy};
use crate::competitors::normalize_display_text;
use crate::export::{ExportOptions, ExportRequest};
use crate::layout::{layout_bracket, BracketLayout};
use crate::types::*;
use tracing::{debug, info};

// ── Helpers ─────────────────────────────────────────────────────────────

/// Lock the session mutex, then call `f` with the session.
fn with_session<F, R>(session: &SharedSession, f: F) -> Result<R, String>
where
    F: FnOnce(&mut BracketSession) -> Result<R, String>,
{
    let mut guard = session.lock().map_err(|e| e.to_string())?;
    f(&mut guard)
}

fn check_manual_selection(session: &BracketSession) -> Result<(), String> {
    match session.mode {
        Some(BracketMode::Random) => Err(BracketError::SelectionInRandomMode.to_string()),
        _ if session.store.is_empty() => Err(BracketError::EmptyBracket.to_string()),
        _ => Ok(()),
    }
}

// ── Commands ────────────────────────────────────────────────────────────

pub fn bracket_state(session: &SharedSession) -> Result<BracketSnapshot, String> {
    with_session(session, |session| Ok(session.snapshot()))
}

pub fn bracket_layout(session: &SharedSession) -> Result<BracketLayout, String> {
    with_session(session, |session| Ok(layout_bracket(&session.store)))
}

/// Build a fresh bracket from the current roster, replacing any previous one.
/// A seed makes the pairing and every random-mode coin flip reproducible.
pub fn generate_bracket(
    session: &SharedSession,
    mode: BracketMode,
    seed: Option<u64>,
) -> Result<BracketSnapshot, String> {
    with_session(session, |session| {
        let roster = session.competitors.all();
        let store = match seed {
            Some(seed) => build(roster, mode, &mut RandEntropy::seeded(seed)),
            None => build(roster, mode, &mut RandEntropy::thread()),
        };
        info!(
            competitors = roster.len(),
            rounds = store.rounds.len(),
            ?mode,
            ?seed,
            "bracket generated"
        );
        session.store = store;
        session.mode = Some(mode);
        Ok(session.snapshot())
    })
}

pub fn select_bracket_winner(
    session: &SharedSession,
    round: usize,
    match_index: usize,
    competitor_id: u32,
) -> Result<BracketSnapshot, String> {
    with_session(session, |session| {
        check_manual_selection(session)?;
        let winner = session
            .store
            .find_competitor(competitor_id)
            .cloned()
            .ok_or_else(|| format!("Competitor {competitor_id} is not in the bracket."))?;
        let next = session
            .store
            .select_winner(round, match_index, &winner)
            .map_err(|e| e.to_string())?;
        info!(round, match_index, competitor = competitor_id, "winner selected");
        session.store = next;
        Ok(session.snapshot())
    })
}

/// Edit a competitor through the bracket: every slot and winner copy is
/// updated, and so is the roster entry when it still exists.
pub fn edit_bracket_competitor(
    session: &SharedSession,
    edit: BracketCompetitorEdit,
) -> Result<BracketSnapshot, String> {
    with_session(session, |session| {
        let mut updated = session
            .store
            .find_competitor(edit.id)
            .cloned()
            .ok_or_else(|| format!("Competitor {} is not in the bracket.", edit.id))?;
        if let Some(raw) = edit.name.as_deref() {
            updated.name = normalize_display_text(raw)
                .ok_or_else(|| "Competitor name cannot be empty.".to_string())?;
        }
        if let Some(raw) = edit.subtitle.as_deref() {
            updated.subtitle = normalize_display_text(raw);
        }

        session.store = session.store.update_competitor(&updated);
        if session.competitors.get(edit.id).is_some() {
            session.competitors.update(
                edit.id,
                Some(updated.name.as_str()),
                Some(updated.subtitle.as_deref().unwrap_or("")),
            )?;
        } else {
            debug!(competitor = edit.id, "edited competitor is no longer on the roster");
        }
        info!(competitor = edit.id, "bracket competitor edited");
        Ok(session.snapshot())
    })
}

pub fn reset_bracket(session: &SharedSession) -> Result<BracketSnapshot, String> {
    with_session(session, |session| {
        session.store = Default::default();
        session.mode = None;
        info!("bracket reset");
        Ok(session.snapshot())
    })
}

/// Snapshot the current bracket for rendering so the lock is not held
/// while an export runs.
pub fn prepare_export(
    session: &SharedSession,
    config: &AppConfig,
    body: &ExportRequestBody,
) -> Result<ExportRequest, String> {
    let store = with_session(session, |session| Ok(session.store.clone()))?;
    let options = ExportOptions::from_config(config).with_overrides(body);
    ExportRequest::new(store, options).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn session_with(names: &[&str]) -> SharedSession {
        let mut session = BracketSession::new();
        for name in names {
            session.competitors.add(name, None).unwrap();
        }
        Arc::new(Mutex::new(session))
    }

    /// The id sitting in slot A of a first-round match.
    fn slot_a(snapshot: &BracketSnapshot, match_index: usize) -> u32 {
        snapshot.rounds[0][match_index].a.as_ref().unwrap().id
    }

    #[test]
    fn generate_replaces_previous_bracket() {
        let session = session_with(&["A", "B", "C", "D"]);

        let first = generate_bracket(&session, BracketMode::Manual, Some(7)).unwrap();
        assert_eq!(first.mode, Some(BracketMode::Manual));
        assert_eq!(first.rounds.len(), 2);

        let second = generate_bracket(&session, BracketMode::Random, Some(7)).unwrap();
        assert_eq!(second.mode, Some(BracketMode::Random));
        assert!(second.champion.is_some());
    }

    #[test]
    fn seeded_generation_is_reproducible() {
        let names = ["A", "B", "C", "D", "E", "F", "G"];
        let left = generate_bracket(&session_with(&names), BracketMode::Random, Some(42)).unwrap();
        let right = generate_bracket(&session_with(&names), BracketMode::Random, Some(42)).unwrap();
        assert_eq!(left.rounds, right.rounds);
        assert_eq!(left.winners, right.winners);
    }

    #[test]
    fn select_requires_a_manual_bracket() {
        let session = session_with(&["A", "B"]);
        let err = select_bracket_winner(&session, 0, 0, 1).unwrap_err();
        assert_eq!(err, BracketError::EmptyBracket.to_string());

        generate_bracket(&session, BracketMode::Random, Some(1)).unwrap();
        let err = select_bracket_winner(&session, 0, 0, 1).unwrap_err();
        assert_eq!(err, BracketError::SelectionInRandomMode.to_string());
    }

    #[test]
    fn select_advances_and_reports_errors() {
        let session = session_with(&["A", "B", "C", "D"]);
        let snapshot = generate_bracket(&session, BracketMode::Manual, Some(3)).unwrap();
        let winner = slot_a(&snapshot, 0);

        let after = select_bracket_winner(&session, 0, 0, winner).unwrap();
        assert_eq!(after.winners[0].len(), 1);
        assert_eq!(after.rounds[1][0].a.as_ref().unwrap().id, winner);

        let other = slot_a(&snapshot, 1);
        assert!(select_bracket_winner(&session, 0, 0, other).is_err());
        assert!(select_bracket_winner(&session, 5, 0, winner).is_err());
        assert!(select_bracket_winner(&session, 0, 0, 99).is_err());
        // the failed calls left the bracket alone
        assert_eq!(bracket_state(&session).unwrap().rounds, after.rounds);
    }

    #[test]
    fn bracket_edit_reaches_every_copy_and_the_roster() {
        let session = session_with(&["A", "B", "C", "D"]);
        let snapshot = generate_bracket(&session, BracketMode::Manual, Some(9)).unwrap();
        let id = slot_a(&snapshot, 0);
        select_bracket_winner(&session, 0, 0, id).unwrap();

        let edit = BracketCompetitorEdit {
            id,
            name: Some("  Renamed ".to_string()),
            subtitle: Some("Team X".to_string()),
        };
        let after = edit_bracket_competitor(&session, edit).unwrap();

        assert_eq!(after.rounds[0][0].a.as_ref().unwrap().name, "Renamed");
        assert_eq!(after.rounds[1][0].a.as_ref().unwrap().name, "Renamed");
        assert_eq!(after.winners[0][0].subtitle.as_deref(), Some("Team X"));
        let on_roster = after.competitors.iter().find(|c| c.id == id).unwrap();
        assert_eq!(on_roster.name, "Renamed");
    }

    #[test]
    fn bracket_edit_rejects_blank_names_and_unknown_ids() {
        let session = session_with(&["A", "B"]);
        generate_bracket(&session, BracketMode::Manual, None).unwrap();

        let blank = BracketCompetitorEdit {
            id: 1,
            name: Some("   ".to_string()),
            subtitle: None,
        };
        assert!(edit_bracket_competitor(&session, blank).is_err());
        let unknown = BracketCompetitorEdit {
            id: 77,
            name: Some("Ghost".to_string()),
            subtitle: None,
        };
        assert!(edit_bracket_competitor(&session, unknown).is_err());
    }

    #[test]
    fn reset_clears_bracket_but_keeps_roster() {
        let session = session_with(&["A", "B", "C"]);
        generate_bracket(&session, BracketMode::Manual, None).unwrap();

        let after = reset_bracket(&session).unwrap();
        assert!(after.rounds.is_empty());
        assert!(after.mode.is_none());
        assert_eq!(after.competitors.len(), 3);
    }

    #[test]
    fn export_needs_a_bracket() {
        let session = session_with(&["A", "B"]);
        let config = AppConfig::default();
        let body = ExportRequestBody::default();
        assert!(prepare_export(&session, &config, &body).is_err());

        generate_bracket(&session, BracketMode::Manual, None).unwrap();
        let request = prepare_export(
            &session,
            &config,
            &ExportRequestBody {
                theme: Some("neon".to_string()),
                ..ExportRequestBody::default()
            },
        )
        .unwrap();
        assert_eq!(request.theme.name, "neon");
        assert_eq!(request.store.rounds.len(), 1);
    }
}
