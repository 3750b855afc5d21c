//! End-to-end hand flows driven straight through the game controller,
//! with rigged decks and zero pacing so every tick advances a state.

use holdem_core::game::entities::{Card, Chips, ClientId, Face, PlayerAction, Suit};
use holdem_core::game::table::TableState;
use holdem_core::game::{
    GameConfig, GameController, GameStatus, GameVariant, OutKind, Outgoing, Pacing, TickOutcome,
};
use holdem_core::protocol::{SnapCode, game_state, player_action};

fn card(s: &str) -> Card {
    s.parse().unwrap()
}

/// A full 52-card rig: the given cards deal first, the rest of the
/// deck follows in canonical order.
fn rig_full(first: &[&str]) -> Vec<Card> {
    let mut cards: Vec<Card> = first.iter().map(|s| card(s)).collect();
    for face in Face::ALL {
        for suit in Suit::ALL {
            let c = Card::new(face, suit);
            if !cards.contains(&c) {
                cards.push(c);
            }
        }
    }
    cards
}

fn game(variant: GameVariant, config: GameConfig, stakes: &[(ClientId, Chips)]) -> GameController {
    let mut g = GameController::new(1, variant, config);
    g.set_pacing(Pacing::instant());
    g.seed_rng(7);
    for (cid, stake) in stakes {
        g.add_player(*cid, &format!("uuid-{cid}"), *stake).unwrap();
    }
    g
}

fn cash_config() -> GameConfig {
    GameConfig {
        blinds_start: 20,
        timeout_secs: 600,
        expire_in_secs: 3600,
        ..GameConfig::default()
    }
}

fn table_state(g: &GameController) -> Option<TableState> {
    g.first_table().map(|t| t.state())
}

fn cur_cid(g: &GameController) -> Option<ClientId> {
    let t = g.first_table()?;
    t.cur_player.and_then(|seat| t.seats[seat].player_id)
}

/// Seat order hole cards go out in: small blind first.
fn deal_order(g: &GameController) -> Vec<ClientId> {
    let t = g.first_table().unwrap();
    let n = t.count_occupied();
    let sb = if n == 2 {
        let bb = t.next_seat(t.dealer).unwrap();
        t.next_seat(bb).unwrap()
    } else {
        t.next_seat(t.dealer).unwrap()
    };
    let mut order = Vec::new();
    let mut seat = sb;
    for _ in 0..n {
        order.push(t.seats[seat].player_id.unwrap());
        seat = t.next_seat(seat).unwrap();
    }
    order
}

fn tick_until(g: &mut GameController, state: TableState, max: usize) {
    for _ in 0..max {
        if table_state(g) == Some(state) {
            return;
        }
        g.tick();
    }
    panic!("never reached {state:?}, stuck at {:?}", table_state(g));
}

/// Play out the current hand by calling/checking every decision.
fn check_down(g: &mut GameController, until: TableState) {
    for _ in 0..500 {
        if table_state(g) == Some(until) {
            return;
        }
        if table_state(g) == Some(TableState::Betting) {
            if let Some(cid) = cur_cid(g) {
                if g.find_player(cid).unwrap().next_action.is_none() {
                    g.set_player_action(cid, PlayerAction::Call, 0).unwrap();
                }
            }
        }
        g.tick();
    }
    panic!("hand never reached {until:?}, stuck at {:?}", table_state(g));
}

fn snaps(out: &[Outgoing], code: SnapCode) -> Vec<String> {
    out.iter()
        .filter_map(|o| match &o.kind {
            OutKind::Snap { code: c, payload } if *c == code => Some(payload.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn heads_up_fold_to_big_blind() {
    let mut g = game(GameVariant::Cash, cash_config(), &[(101, 1500), (102, 1500)]);
    let order = deal_order(&g);
    let (sb_cid, bb_cid) = (order[0], order[1]);
    g.rig_deck(rig_full(&["As", "Kd", "7c", "2h"]));

    tick_until(&mut g, TableState::Betting, 20);
    g.drain_outbox();

    // The small blind is first to act heads-up and folds.
    assert_eq!(cur_cid(&g), Some(sb_cid));
    g.set_player_action(sb_cid, PlayerAction::Fold, 0).unwrap();
    tick_until(&mut g, TableState::EndRound, 20);
    let out: Vec<Outgoing> = g.drain_outbox().into();

    assert_eq!(g.find_player(sb_cid).unwrap().stake, 1490);
    assert_eq!(g.find_player(bb_cid).unwrap().stake, 1510);
    assert_eq!(
        g.find_player(sb_cid).unwrap().last_action,
        PlayerAction::Fold
    );

    // The whole 30-chip pot went to the big blind in one award.
    let wins = snaps(&out, SnapCode::WinPot);
    assert_eq!(wins, vec![format!("{bb_cid} 0 30")]);

    // Nobody went broke.
    g.tick();
    let out: Vec<Outgoing> = g.drain_outbox().into();
    for payload in snaps(&out, SnapCode::GameState) {
        assert!(!payload.starts_with(&game_state::BROKE.to_string()));
    }
}

#[test]
fn heads_up_dealer_posts_small_blind() {
    let mut g = game(GameVariant::Cash, cash_config(), &[(1, 1500), (2, 1500)]);
    g.rig_deck(rig_full(&[]));
    tick_until(&mut g, TableState::Betting, 20);
    let t = g.first_table().unwrap();
    assert_eq!(t.dealer, t.sb);
    assert_ne!(t.sb, t.bb);
    assert_eq!(t.seats[t.sb].bet, 10);
    assert_eq!(t.seats[t.bb].bet, 20);
}

#[test]
fn dealer_advances_clockwise_between_hands() {
    let mut g = game(
        GameVariant::Cash,
        cash_config(),
        &[(1, 1000), (2, 1000), (3, 1000)],
    );
    g.rig_deck(rig_full(&[]));
    tick_until(&mut g, TableState::Betting, 20);
    let dealer_before = g.first_table().unwrap().dealer;
    let expected_next = g.first_table().unwrap().next_seat(dealer_before).unwrap();

    check_down(&mut g, TableState::EndRound);
    g.tick(); // run EndRound
    assert_eq!(g.first_table().unwrap().dealer, expected_next);
}

#[test]
fn showdown_awards_pot_to_best_hand() {
    let mut g = game(
        GameVariant::Cash,
        cash_config(),
        &[(1, 1000), (2, 1000), (3, 1000)],
    );
    let order = deal_order(&g);
    // Small blind takes aces, big blind kings, the button trash; the
    // board pairs the aces.
    g.rig_deck(rig_full(&[
        "As", "Ac", // sb
        "Kd", "Kc", // bb
        "7s", "2d", // button
        "Ah", "9c", "5d", // flop
        "3s", "Jh", // turn, river
    ]));

    tick_until(&mut g, TableState::Betting, 20);
    check_down(&mut g, TableState::EndRound);
    let out: Vec<Outgoing> = g.drain_outbox().into();

    let winner = order[0];
    assert_eq!(g.find_player(winner).unwrap().stake, 1040);
    assert_eq!(g.find_player(order[1]).unwrap().stake, 980);
    assert_eq!(g.find_player(order[2]).unwrap().stake, 980);

    let wins = snaps(&out, SnapCode::WinPot);
    assert_eq!(wins, vec![format!("{winner} 0 60")]);

    // Chips are conserved across the hand.
    let total: Chips = [1, 2, 3]
        .iter()
        .map(|cid| g.find_player(*cid).unwrap().stake)
        .sum();
    assert_eq!(total, 3000);
}

#[test]
fn chopped_pot_splits_with_odd_chip_clockwise_from_dealer() {
    let config = GameConfig {
        blinds_start: 25,
        timeout_secs: 600,
        expire_in_secs: 3600,
        ..GameConfig::default()
    };
    let mut g = game(GameVariant::Cash, config, &[(1, 1000), (2, 1000), (3, 1000)]);
    let order = deal_order(&g);
    // Two identical ace-king hands chop; the third hand misses.
    g.rig_deck(rig_full(&[
        "As", "Kd", // sb
        "Ac", "Kh", // bb
        "2s", "2d", // button
        "3c", "4d", "8h", // flop
        "9s", "Kc", // turn, river
    ]));

    tick_until(&mut g, TableState::Betting, 20);
    check_down(&mut g, TableState::EndRound);
    let out: Vec<Outgoing> = g.drain_outbox().into();

    // Pot is 75: each winner takes 37, one odd chip is left over.
    let wins = snaps(&out, SnapCode::WinPot);
    assert_eq!(wins.len(), 2);
    for cid in &order[0..2] {
        assert!(wins.contains(&format!("{cid} 0 37")));
    }

    // The odd chip lands on the first eligible seat clockwise from
    // the button, which is the small blind.
    let odd = snaps(&out, SnapCode::OddChips);
    assert_eq!(odd, vec![format!("{} 0 1", order[0])]);

    let total: Chips = [1, 2, 3]
        .iter()
        .map(|cid| g.find_player(*cid).unwrap().stake)
        .sum();
    assert_eq!(total, 3000);
}

#[test]
fn timeout_auto_folds_and_eventually_marks_leaver() {
    let config = GameConfig {
        blinds_start: 20,
        timeout_secs: 0,
        expire_in_secs: 3600,
        ..GameConfig::default()
    };
    let mut g = game(GameVariant::Cash, config, &[(1, 1500), (2, 1500)]);
    g.rig_deck(rig_full(&[]));

    tick_until(&mut g, TableState::Betting, 20);
    let first_actor = cur_cid(&g).unwrap();
    g.tick(); // the clock has already run out; the fold is automatic
    let out: Vec<Outgoing> = g.drain_outbox().into();
    let actions = snaps(&out, SnapCode::PlayerAction);
    assert!(
        actions
            .iter()
            .any(|p| *p == format!("{} {first_actor} 1", player_action::FOLDED)),
        "expected an automatic fold, got {actions:?}"
    );
    assert_eq!(g.find_player(first_actor).unwrap().timed_out_count, 1);

    // Three strikes make a player sit out and, in a cash game, leave.
    let mut struck = None;
    for _ in 0..400 {
        g.tick();
        if let Some(p) = [1, 2]
            .iter()
            .filter_map(|cid| g.find_player(*cid))
            .find(|p| p.wanna_leave)
        {
            struck = Some(p.client_id);
            break;
        }
    }
    let struck = struck.expect("someone should have struck out");
    let p = g.find_player(struck).unwrap();
    assert!(p.sitout);
    assert!(p.wanna_leave);
    assert_eq!(p.timed_out_count, 0);
}

#[test]
fn sng_timeout_marks_sitout_but_not_leaver() {
    let config = GameConfig {
        blinds_start: 20,
        timeout_secs: 0,
        max_players: 2,
        ..GameConfig::default()
    };
    let mut g = game(GameVariant::Sng, config, &[(1, 1500), (2, 1500)]);
    g.rig_deck(rig_full(&[]));

    let mut struck = None;
    for _ in 0..400 {
        g.tick();
        if let Some(p) = [1, 2]
            .iter()
            .filter_map(|cid| g.find_player(*cid))
            .find(|p| p.sitout)
        {
            struck = Some(p.client_id);
            break;
        }
    }
    let struck = struck.expect("someone should have been sat out");
    assert!(!g.find_player(struck).unwrap().wanna_leave);
}

#[test]
fn action_reset_is_idempotent() {
    let mut g = game(GameVariant::Cash, cash_config(), &[(1, 1500), (2, 1500)]);
    g.set_player_action(1, PlayerAction::Raise, 100).unwrap();
    assert!(g.find_player(1).unwrap().next_action.is_some());
    g.set_player_action(1, PlayerAction::ResetAction, 0).unwrap();
    assert!(g.find_player(1).unwrap().next_action.is_none());
    g.set_player_action(1, PlayerAction::ResetAction, 0).unwrap();
    assert!(g.find_player(1).unwrap().next_action.is_none());
}

#[test]
fn sng_elimination_builds_finish_list() {
    let config = GameConfig {
        blinds_start: 20,
        timeout_secs: 600,
        max_players: 2,
        ..GameConfig::default()
    };
    let mut g = game(GameVariant::Sng, config, &[(1, 1500), (2, 1500)]);

    // Seats are assigned at start; rig once they exist.
    g.tick();
    assert_eq!(g.status(), GameStatus::Started);
    let order = deal_order(&g);
    let (sb_cid, bb_cid) = (order[0], order[1]);
    g.rig_deck(rig_full(&[
        "As", "Ac", // sb
        "7d", "2c", // bb
        "3c", "4d", "9h", // flop
        "Js", "Qc", // turn, river
    ]));

    tick_until(&mut g, TableState::Betting, 20);
    g.set_player_action(sb_cid, PlayerAction::Allin, 0).unwrap();
    g.set_player_action(bb_cid, PlayerAction::Allin, 0).unwrap();
    check_down(&mut g, TableState::EndRound);

    // EndRound records the bust, the table closes, and the survivor is
    // appended last: earliest bust finishes last in the list.
    g.tick();
    let out: Vec<Outgoing> = g.drain_outbox().into();

    let broke: Vec<String> = snaps(&out, SnapCode::GameState)
        .into_iter()
        .filter(|p| p.starts_with(&format!("{} ", game_state::BROKE)))
        .collect();
    assert_eq!(broke, vec![format!("{} {bb_cid} 2", game_state::BROKE)]);
    assert!(g.is_ended());
    assert_eq!(g.finish_list(), &[bb_cid, sb_cid]);
    assert_eq!(g.tick(), TickOutcome::Closed);
}

#[test]
fn cash_game_expires_on_wall_clock() {
    let config = GameConfig {
        expire_in_secs: 0,
        ..cash_config()
    };
    let mut g = game(GameVariant::Cash, config, &[(1, 1500)]);
    g.tick(); // starts with one player
    assert_eq!(g.status(), GameStatus::Started);
    g.tick(); // and expires immediately
    assert!(g.is_ended());
    assert_eq!(g.tick(), TickOutcome::Closed);
}

#[test]
fn empty_cash_game_expires_before_start() {
    let config = GameConfig {
        expire_in_secs: 0,
        ..cash_config()
    };
    let mut g = game(GameVariant::Cash, config, &[]);
    g.tick();
    assert!(g.is_ended());
}

#[test]
fn cash_leaver_is_released_at_hand_start() {
    let mut g = game(
        GameVariant::Cash,
        cash_config(),
        &[(1, 1500), (2, 1500), (3, 1500)],
    );
    g.rig_deck(rig_full(&[]));
    tick_until(&mut g, TableState::Betting, 20);

    // Leaving mid-hand only marks the player; the seat survives the
    // hand and clears at the next hand start.
    g.remove_player(3).unwrap();
    assert!(g.find_player(3).unwrap().wanna_leave);
    assert_eq!(g.first_table().unwrap().count_occupied(), 3);

    check_down(&mut g, TableState::EndRound);
    g.tick(); // EndRound
    for _ in 0..5 {
        g.tick();
    }
    assert_eq!(g.first_table().unwrap().count_occupied(), 2);
    assert!(!g.player_list(false).contains(&3));
    assert!(g.player_list(true).contains(&3));
}
