use rand::rngs::{StdRng, ThreadRng};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Competitor {
  pub id: u32,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub subtitle: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image: Option<String>,
}

impl Competitor {
  pub fn new(id: u32, name: impl Into<String>) -> Self {
    Competitor {
      id,
      name: name.into(),
      subtitle: None,
      image: None,
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BracketMode {
  Random,
  #[default]
  Manual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
  A,
  B,
}

/// One contest. `bye` marks a match whose B slot has no feeder at all, so a
/// lone occupant in A advances without a contest. An empty B on a non-bye
/// match is still waiting for a winner from the previous round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
  pub a: Option<Competitor>,
  pub b: Option<Competitor>,
  #[serde(default)]
  pub bye: bool,
}

impl Match {
  pub fn contested(a: Competitor, b: Competitor) -> Self {
    Match {
      a: Some(a),
      b: Some(b),
      bye: false,
    }
  }

  pub fn bye(holder: Competitor) -> Self {
    Match {
      a: Some(holder),
      b: None,
      bye: true,
    }
  }

  pub fn placeholder(bye: bool) -> Self {
    Match { a: None, b: None, bye }
  }

  pub fn occupants(&self) -> impl Iterator<Item = &Competitor> {
    self.a.iter().chain(self.b.iter())
  }

  pub fn occupant(&self, id: u32) -> Option<&Competitor> {
    self.occupants().find(|c| c.id == id)
  }

  pub fn contains(&self, id: u32) -> bool {
    self.occupant(id).is_some()
  }

  fn slot_mut(&mut self, side: Side) -> &mut Option<Competitor> {
    match side {
      Side::A => &mut self.a,
      Side::B => &mut self.b,
    }
  }

  /// Both slots filled, or a bye with its holder present.
  pub fn is_ready(&self) -> bool {
    if self.bye {
      self.a.is_some()
    } else {
      self.a.is_some() && self.b.is_some()
    }
  }
}

/// Where the winner of `match_index` lands in the following round.
pub fn destination(match_index: usize) -> (usize, Side) {
  let side = if match_index % 2 == 0 { Side::A } else { Side::B };
  (match_index / 2, side)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BracketError {
  #[error("round {round} is out of range (bracket has {rounds} rounds)")]
  RoundOutOfRange { round: usize, rounds: usize },
  #[error("match {match_index} is out of range for round {round} ({matches} matches)")]
  MatchOutOfRange {
    round: usize,
    match_index: usize,
    matches: usize,
  },
  #[error("competitor {id} is not in round {round} match {match_index}")]
  NotInMatch {
    id: u32,
    round: usize,
    match_index: usize,
  },
  #[error("round {round} match {match_index} is still waiting for an opponent")]
  MatchIncomplete { round: usize, match_index: usize },
  #[error("winners are drawn automatically in random mode")]
  SelectionInRandomMode,
  #[error("no bracket has been generated")]
  EmptyBracket,
}

// ── Entropy ────────────────────────────────────────────────────────────

/// Source of the two random decisions the builder makes: the initial
/// pairing order and the coin flip for contested random-mode matches.
pub trait Entropy {
  fn shuffle(&mut self, competitors: &mut [Competitor]);
  fn coin_flip(&mut self) -> bool;
}

pub struct RandEntropy<R> {
  rng: R,
}

impl<R: Rng> RandEntropy<R> {
  pub fn new(rng: R) -> Self {
    RandEntropy { rng }
  }
}

impl RandEntropy<ThreadRng> {
  pub fn thread() -> Self {
    RandEntropy::new(rand::rng())
  }
}

impl RandEntropy<StdRng> {
  pub fn seeded(seed: u64) -> Self {
    RandEntropy::new(StdRng::seed_from_u64(seed))
  }
}

impl<R: Rng> Entropy for RandEntropy<R> {
  fn shuffle(&mut self, competitors: &mut [Competitor]) {
    competitors.shuffle(&mut self.rng);
  }

  fn coin_flip(&mut self) -> bool {
    self.rng.random_bool(0.5)
  }
}

/// Keeps the input order and replays a fixed list of coin flips (slot A wins
/// on `true`). Once the script runs out every flip is `true`.
#[derive(Clone, Debug, Default)]
pub struct ScriptedEntropy {
  flips: VecDeque<bool>,
}

impl ScriptedEntropy {
  pub fn new(flips: impl IntoIterator<Item = bool>) -> Self {
    ScriptedEntropy {
      flips: flips.into_iter().collect(),
    }
  }
}

impl Entropy for ScriptedEntropy {
  fn shuffle(&mut self, _competitors: &mut [Competitor]) {}

  fn coin_flip(&mut self) -> bool {
    self.flips.pop_front().unwrap_or(true)
  }
}

// ── Store ──────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketStore {
  pub rounds: Vec<Vec<Match>>,
  pub winners: Vec<Vec<Competitor>>,
}

impl BracketStore {
  pub fn is_empty(&self) -> bool {
    self.rounds.is_empty()
  }

  pub fn champion(&self) -> Option<&Competitor> {
    match self.winners.last() {
      Some(last) if last.len() == 1 => last.first(),
      _ => None,
    }
  }

  pub fn match_index_of(&self, round: usize, id: u32) -> Option<usize> {
    self.rounds.get(round)?.iter().position(|m| m.contains(id))
  }

  /// Any copy of the competitor with this id, searching every slot.
  pub fn find_competitor(&self, id: u32) -> Option<&Competitor> {
    self
      .rounds
      .iter()
      .flatten()
      .flat_map(|m| m.occupants())
      .find(|c| c.id == id)
  }

  pub fn first_round_matches(&self) -> usize {
    self.rounds.first().map(|round| round.len()).unwrap_or(0)
  }

  /// Records `winner` for one match and re-derives every later round.
  pub fn select_winner(
    &self,
    round_index: usize,
    match_index: usize,
    winner: &Competitor,
  ) -> Result<BracketStore, BracketError> {
    let round = self.rounds.get(round_index).ok_or(BracketError::RoundOutOfRange {
      round: round_index,
      rounds: self.rounds.len(),
    })?;
    let target = round.get(match_index).ok_or(BracketError::MatchOutOfRange {
      round: round_index,
      match_index,
      matches: round.len(),
    })?;
    let chosen = target
      .occupant(winner.id)
      .cloned()
      .ok_or(BracketError::NotInMatch {
        id: winner.id,
        round: round_index,
        match_index,
      })?;
    if !target.is_ready() {
      return Err(BracketError::MatchIncomplete {
        round: round_index,
        match_index,
      });
    }
    let occupant_ids: Vec<u32> = target.occupants().map(|c| c.id).collect();

    let mut next = self.clone();
    next.invalidate_from(round_index, match_index);
    next.winners[round_index].retain(|c| !occupant_ids.contains(&c.id));
    next.winners[round_index].push(chosen);
    next.sort_winners(round_index);
    next.forward_from(round_index);
    Ok(next)
  }

  /// Replaces every copy of the competitor with the same id.
  pub fn update_competitor(&self, competitor: &Competitor) -> BracketStore {
    let mut next = self.clone();
    for round in next.rounds.iter_mut() {
      for m in round.iter_mut() {
        for slot in [&mut m.a, &mut m.b] {
          if let Some(existing) = slot.as_mut() {
            if existing.id == competitor.id {
              *existing = competitor.clone();
            }
          }
        }
      }
    }
    for round_winners in next.winners.iter_mut() {
      for existing in round_winners.iter_mut() {
        if existing.id == competitor.id {
          *existing = competitor.clone();
        }
      }
    }
    next
  }

  fn invalidate_from(&mut self, round: usize, match_index: usize) {
    let mut round = round;
    let mut match_index = match_index;
    while round + 1 < self.rounds.len() {
      let next_round = round + 1;
      let (next_index, side) = destination(match_index);
      let Some(next) = self.rounds[next_round].get_mut(next_index) else {
        break;
      };
      let Some(cleared) = next.slot_mut(side).take() else {
        break;
      };
      let remaining: Vec<u32> = next.occupants().map(|c| c.id).collect();
      self.winners[next_round].retain(|c| c.id != cleared.id && !remaining.contains(&c.id));
      debug!(
        round = next_round,
        match_index = next_index,
        competitor = cleared.id,
        "cleared downstream slot"
      );
      round = next_round;
      match_index = next_index;
    }
  }

  fn forward_from(&mut self, start: usize) {
    let last = self.rounds.len().saturating_sub(1);
    for round in start..last {
      let next_round = round + 1;
      let advancing = self.winners[round].clone();
      for competitor in advancing {
        let Some(match_index) = self.match_index_of(round, competitor.id) else {
          continue;
        };
        let (next_index, side) = destination(match_index);
        if let Some(next) = self.rounds[next_round].get_mut(next_index) {
          *next.slot_mut(side) = Some(competitor);
        }
      }

      let byes: Vec<Competitor> = self.rounds[next_round]
        .iter()
        .filter(|m| m.bye)
        .filter_map(|m| m.a.clone())
        .filter(|c| !self.winners[next_round].iter().any(|w| w.id == c.id))
        .collect();
      if !byes.is_empty() {
        self.winners[next_round].extend(byes);
        self.sort_winners(next_round);
      }
    }
  }

  fn sort_winners(&mut self, round: usize) {
    let matches = &self.rounds[round];
    self.winners[round].sort_by_key(|c| {
      matches
        .iter()
        .position(|m| m.contains(c.id))
        .unwrap_or(usize::MAX)
    });
  }
}

// ── Builder ────────────────────────────────────────────────────────────

pub fn build<E: Entropy + ?Sized>(
  competitors: &[Competitor],
  mode: BracketMode,
  entropy: &mut E,
) -> BracketStore {
  if competitors.len() < 2 {
    return BracketStore::default();
  }
  let mut pool = competitors.to_vec();
  entropy.shuffle(&mut pool);
  let first_round = pair_round(pool);
  match mode {
    BracketMode::Random => build_random(first_round, entropy),
    BracketMode::Manual => build_manual(first_round),
  }
}

/// Pairs neighbours; an odd leftover becomes a bye match appended last.
fn pair_round(mut pool: Vec<Competitor>) -> Vec<Match> {
  let bye_holder = if pool.len() % 2 == 1 { pool.pop() } else { None };
  let mut matches = Vec::with_capacity(pool.len() / 2 + 1);
  let mut iter = pool.into_iter();
  while let (Some(a), Some(b)) = (iter.next(), iter.next()) {
    matches.push(Match::contested(a, b));
  }
  if let Some(holder) = bye_holder {
    matches.push(Match::bye(holder));
  }
  matches
}

fn resolve_random<E: Entropy + ?Sized>(m: &Match, entropy: &mut E) -> Option<Competitor> {
  match (&m.a, &m.b) {
    (Some(a), Some(b)) => {
      if entropy.coin_flip() {
        Some(a.clone())
      } else {
        Some(b.clone())
      }
    }
    (Some(only), None) | (None, Some(only)) => Some(only.clone()),
    (None, None) => None,
  }
}

fn build_random<E: Entropy + ?Sized>(first_round: Vec<Match>, entropy: &mut E) -> BracketStore {
  let mut rounds = Vec::new();
  let mut winners = Vec::new();
  let mut current = first_round;
  loop {
    let round_winners: Vec<Competitor> = current
      .iter()
      .filter_map(|m| resolve_random(m, entropy))
      .collect();
    rounds.push(current);
    let decided = round_winners.len() <= 1;
    winners.push(round_winners.clone());
    if decided {
      break;
    }
    current = pair_round(round_winners);
  }
  BracketStore { rounds, winners }
}

fn build_manual(first_round: Vec<Match>) -> BracketStore {
  let mut rounds = vec![first_round];
  loop {
    let prev_len = rounds[rounds.len() - 1].len();
    if prev_len <= 1 {
      break;
    }
    let next = (0..prev_len.div_ceil(2))
      .map(|j| Match::placeholder(2 * j + 1 >= prev_len))
      .collect();
    rounds.push(next);
  }

  let mut winners = vec![Vec::new(); rounds.len()];
  winners[0] = rounds[0]
    .iter()
    .filter(|m| m.bye)
    .filter_map(|m| m.a.clone())
    .collect();

  let mut store = BracketStore { rounds, winners };
  store.forward_from(0);
  store
}
