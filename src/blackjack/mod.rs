pub mod report;

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use rand::{Rng, RngCore};

use crate::solver::{Environment, Reward};

pub const ACE: u32 = 11;
pub const BLACKJACK: u32 = 21;
// Dealer draws while below this count.
pub const DEALER_STANDS_AT: u32 = 17;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Card {
    Ace,
    Value(u32),
    Face,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Action {
    Hit,
    Stay,
}

// How starting states are produced.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StartMode {
    // Two cards for the player and the dealer's face-up card, as in a real deal.
    Dealt,
    // Exploring starts: every non-terminal state is reachable from the start.
    Uniform,
}

// Player count, dealer's face-up card and the number of aces counted as 11.
//
// The learner only distinguishes soft from hard hands: equality, ordering and hashing
// look at (count, dealer, is_soft) and ignore how many aces are usable.
#[derive(Clone, Copy, Debug)]
pub struct State {
    count: u32,
    dealer: u32,
    usable_aces: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct Blackjack {
    start_mode: StartMode,
}

impl Card {
    pub fn value(&self) -> u32 {
        match self {
            Card::Ace => ACE,
            Card::Value(v) => *v,
            Card::Face => 10,
        }
    }

    pub fn is_ace(&self) -> bool {
        matches!(self, Card::Ace)
    }
}

// Draws with replacement from a single suit: ace, 2 to 10 and three faces.
pub fn deal_card(rng: &mut dyn RngCore) -> Card {
    let r = rng.gen_range(1..=13);
    match r {
        1 => Card::Ace,
        2..=10 => Card::Value(r),
        _ => Card::Face,
    }
}

impl State {
    pub fn new(count: u32, dealer: u32, usable_aces: u32) -> State {
        State {
            count,
            dealer,
            usable_aces,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn dealer(&self) -> u32 {
        self.dealer
    }

    #[cfg(test)]
    pub fn usable_aces(&self) -> u32 {
        self.usable_aces
    }

    pub fn is_soft(&self) -> bool {
        self.usable_aces > 0
    }

    fn key(&self) -> (u32, u32, bool) {
        (self.count, self.dealer, self.is_soft())
    }

    // Adds the card to the player's count. Aces come in as 11.
    pub fn add_card(&self, card: Card) -> State {
        let mut state = *self;
        state.count += card.value();
        if card.is_ace() {
            state.usable_aces += 1;
        }
        state
    }

    // Returns whether the hand is finished (21 or bust).
    // A count over 21 first gives back 10 for one usable ace, if any.
    pub fn check_terminal(&mut self) -> bool {
        match self.count.cmp(&BLACKJACK) {
            Ordering::Less => false,
            Ordering::Equal => true,
            Ordering::Greater => {
                if self.usable_aces > 0 {
                    self.count -= 10;
                    self.usable_aces -= 1;
                }
                self.count >= BLACKJACK
            }
        }
    }
}

impl PartialEq for State {
    fn eq(&self, other: &State) -> bool {
        self.key() == other.key()
    }
}

impl Eq for State {}

impl Hash for State {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        self.key().hash(hasher);
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &State) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for State {
    fn cmp(&self, other: &State) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.count,
            self.dealer,
            if self.is_soft() { "soft" } else { "hard" }
        )
    }
}

// Draw: equal counts or both bust.
// Loss: player busts alone, or the dealer is closer to 21.
// Win: dealer busts alone, or the player is closer to 21.
pub fn determine_winner(player: u32, dealer: u32) -> Reward {
    if player == dealer || (player > BLACKJACK && dealer > BLACKJACK) {
        Reward::None
    } else if player > BLACKJACK {
        Reward::Loss
    } else if dealer > BLACKJACK || player > dealer {
        Reward::Win
    } else {
        Reward::Loss
    }
}

// Plays the dealer's hand from the face-up card and returns the final count.
// The dealer draws until reaching 17 and stands on soft 17.
pub fn dealer_count(up_card: u32, rng: &mut dyn RngCore) -> u32 {
    let mut dealer = State::new(up_card, 0, (up_card == ACE) as u32);
    while dealer.count < DEALER_STANDS_AT {
        dealer = dealer.add_card(deal_card(rng));
        dealer.check_terminal();
    }
    dealer.count
}

// Finishes the game for a player standing on (or busted at) `player` points.
pub fn end_game(player: u32, up_card: u32, rng: &mut dyn RngCore) -> Reward {
    determine_winner(player, dealer_count(up_card, rng))
}

// A fixed baseline that only sticks on 20 or higher.
pub fn stick_at_20(state: &State) -> Action {
    if state.count() < 20 {
        Action::Hit
    } else {
        Action::Stay
    }
}

impl Blackjack {
    pub fn new(start_mode: StartMode) -> Blackjack {
        Blackjack { start_mode }
    }

    fn dealt_state(rng: &mut dyn RngCore) -> State {
        let mut state = State::new(0, 0, 0)
            .add_card(deal_card(rng))
            .add_card(deal_card(rng));
        state.check_terminal();
        state.dealer = deal_card(rng).value();
        state
    }

    fn uniform_state(rng: &mut dyn RngCore) -> State {
        // 48 of the 169 two-card hands hold at least one ace.
        let soft = rng.gen_range(1..=169) <= 48;
        let count = if soft {
            rng.gen_range(12..=20)
        } else {
            rng.gen_range(4..=20)
        };
        State::new(count, rng.gen_range(2..=ACE), soft as u32)
    }
}

impl Environment for Blackjack {
    type State = State;
    type Action = Action;

    fn starting_state(&self, rng: &mut dyn RngCore) -> State {
        match self.start_mode {
            StartMode::Dealt => Blackjack::dealt_state(rng),
            StartMode::Uniform => Blackjack::uniform_state(rng),
        }
    }

    // Dealt blackjacks leave nothing to decide.
    fn accepts_start(&self, state: &State) -> bool {
        state.count() != BLACKJACK
    }

    fn valid_actions(&self, _state: &State) -> Vec<Action> {
        vec![Action::Hit, Action::Stay]
    }

    fn transform(
        &self,
        state: &State,
        action: Action,
        rng: &mut dyn RngCore,
    ) -> (Reward, Option<State>) {
        match action {
            Action::Hit => {
                let mut next = state.add_card(deal_card(rng));
                if !next.check_terminal() {
                    return (Reward::None, Some(next));
                }
                // 21 or bust; the dealer still plays, a double bust is a draw.
                (end_game(next.count(), next.dealer(), rng), None)
            }
            Action::Stay => (end_game(state.count(), state.dealer(), rng), None),
        }
    }
}
