//! The insurance mini-market, driven through full all-in hands.

use holdem_core::game::entities::{Card, ClientId, Face, PlayerAction, Suit};
use holdem_core::game::table::{SuspendReason, TableState};
use holdem_core::game::{GameConfig, GameController, GameVariant, OutKind, Outgoing, Pacing};
use holdem_core::protocol::SnapCode;

fn card(s: &str) -> Card {
    s.parse().unwrap()
}

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

fn table_state(g: &GameController) -> Option<TableState> {
    g.first_table().map(|t| t.state())
}

fn snaps_to(out: &[Outgoing], code: SnapCode) -> Vec<(Option<ClientId>, String)> {
    use holdem_core::game::Recipient;
    out.iter()
        .filter_map(|o| match &o.kind {
            OutKind::Snap { code: c, payload } if *c == code => {
                let to = match o.to {
                    Recipient::Client(cid) => Some(cid),
                    Recipient::Listeners => None,
                };
                Some((to, payload.clone()))
            }
            _ => None,
        })
        .collect()
}

/// Heads-up aces against a flush draw, all-in preflop, with the deck
/// rigged so the turn card is controlled per case. Returns the game
/// with the suspension reached plus `(leader, villain)`.
fn all_in_flush_draw(turn: &str, river: &str) -> (GameController, ClientId, ClientId) {
    let config = GameConfig {
        blinds_start: 20,
        timeout_secs: 600,
        expire_in_secs: 3600,
        enable_insurance: true,
        ..GameConfig::default()
    };
    let mut g = GameController::new(1, GameVariant::Cash, config);
    g.set_pacing(Pacing::instant());
    g.seed_rng(7);
    g.add_player(11, "uuid-11", 500).unwrap();
    g.add_player(12, "uuid-12", 500).unwrap();

    // Heads-up deal order: the dealer posts the small blind and is
    // dealt first.
    let t = g.first_table().unwrap();
    let bb_seat = t.next_seat(t.dealer).unwrap();
    let sb_seat = t.next_seat(bb_seat).unwrap();
    let leader = t.seats[sb_seat].player_id.unwrap();
    let villain = t.seats[bb_seat].player_id.unwrap();

    // Leader holds aces, villain a heart draw; two hearts flop.
    g.rig_deck(rig_full(&[
        "As", "Ad", // leader
        "Kh", "Qh", // villain
        "2h", "7h", "9c", // flop
        turn, river,
    ]));

    for _ in 0..10 {
        if table_state(&g) == Some(TableState::Betting) {
            break;
        }
        g.tick();
    }
    g.set_player_action(leader, PlayerAction::Allin, 0).unwrap();
    g.set_player_action(villain, PlayerAction::Allin, 0).unwrap();

    for _ in 0..50 {
        if table_state(&g) == Some(TableState::Suspend) {
            break;
        }
        g.tick();
    }
    assert_eq!(table_state(&g), Some(TableState::Suspend));
    assert_eq!(
        g.first_table().unwrap().suspend_reason,
        SuspendReason::BuyInsurance
    );
    (g, leader, villain)
}

fn run_to_end_round(g: &mut GameController) {
    for _ in 0..200 {
        if table_state(g) == Some(TableState::EndRound) {
            return;
        }
        g.tick();
    }
    panic!("hand never finished, stuck at {:?}", table_state(g));
}

#[test]
fn all_in_on_the_flop_suspends_and_offers_insurance() {
    let (mut g, leader, _villain) = all_in_flush_draw("2c", "2d");
    let out: Vec<Outgoing> = g.drain_outbox().into();

    let offers = snaps_to(&out, SnapCode::BuyInsurance);
    assert_eq!(offers.len(), 1);
    let (to, payload) = &offers[0];
    assert_eq!(*to, Some(leader));

    // Pot 1000, sole leader: buy cap 333, nine outs at 3.0 gives 999.
    let mut parts = payload.split_whitespace();
    assert_eq!(parts.next(), Some("999"));
    let outs: Vec<&str> = parts.next().unwrap().split(':').collect();
    assert_eq!(outs.len(), 9);
    assert!(outs.iter().all(|c| c.ends_with('h')));

    // The nine hearts belong to the villain's draw.
    let slot = &g.find_player(leader).unwrap().insurance[0];
    assert_eq!(slot.outs.len(), 9);
    assert_eq!(slot.max_payment, 999);
}

#[test]
fn insured_out_hits_and_pays_capped_minus_take_back() {
    // Turn is a bought heart.
    let (mut g, leader, villain) = all_in_flush_draw("3h", "2d");

    let buy: Vec<Card> = ["3h", "4h", "5h", "6h"].iter().map(|s| card(s)).collect();
    g.buy_insurance(leader, 100, &buy).unwrap();

    // Both offers answered (the villain had none), so the table
    // resumes without waiting out the window.
    run_to_end_round(&mut g);
    let out: Vec<Outgoing> = g.drain_outbox().into();

    // Payout 100 x 7.5 = 750, minus the take-back on the five
    // uninsured outs (ceil(100 / 6) = 17), credited when the turn
    // card landed.
    let benefits = snaps_to(&out, SnapCode::InsuranceBenefits);
    assert!(benefits.contains(&(Some(leader), "733".to_string())), "got {benefits:?}");

    // The villain's flush holds up and takes the pot.
    assert_eq!(g.find_player(leader).unwrap().stake, 733);
    assert_eq!(g.find_player(villain).unwrap().stake, 1000);
}

#[test]
fn blank_turn_collects_premium_minus_take_back() {
    // Turn misses every out; the river pairs the board so the leader
    // still wins the pot.
    let (mut g, leader, villain) = all_in_flush_draw("2c", "2d");

    let buy: Vec<Card> = ["3h", "4h", "5h", "6h"].iter().map(|s| card(s)).collect();
    g.buy_insurance(leader, 100, &buy).unwrap();

    // The turn-round offer comes up next (the draw is still live);
    // decline it so no auto-buy kicks in.
    for _ in 0..50 {
        if table_state(&g) == Some(TableState::Suspend)
            && g.first_table().unwrap().betround.wire_code() == 2
        {
            break;
        }
        g.tick();
    }
    g.buy_insurance(leader, 0, &[]).unwrap();

    run_to_end_round(&mut g);
    let out: Vec<Outgoing> = g.drain_outbox().into();

    // Premium owed at showdown: 100 minus ceil(100 / R[5]) = 83.
    let benefits = snaps_to(&out, SnapCode::InsuranceBenefits);
    assert!(
        benefits.contains(&(Some(leader), "-83".to_string())),
        "got {benefits:?}"
    );

    // The leader wins the 1000 pot and pays the premium.
    assert_eq!(g.find_player(leader).unwrap().stake, 1000 - 83);
    assert_eq!(g.find_player(villain).unwrap().stake, 0);
}

#[test]
fn unbought_out_hits_and_still_costs_the_premium() {
    // Turn is a heart the leader chose not to insure.
    let (mut g, leader, villain) = all_in_flush_draw("Th", "2d");

    let buy: Vec<Card> = ["3h", "4h", "5h", "6h"].iter().map(|s| card(s)).collect();
    g.buy_insurance(leader, 100, &buy).unwrap();

    run_to_end_round(&mut g);
    let out: Vec<Outgoing> = g.drain_outbox().into();

    let benefits = snaps_to(&out, SnapCode::InsuranceBenefits);
    assert!(
        benefits.contains(&(Some(leader), "-83".to_string())),
        "got {benefits:?}"
    );

    // Pot to the flush, premium (less take-back) from the leader.
    assert_eq!(g.find_player(leader).unwrap().stake, 0);
    assert_eq!(g.find_player(villain).unwrap().stake, 1000);
}

#[test]
fn purchase_outside_the_published_outs_is_rejected() {
    let (mut g, leader, _villain) = all_in_flush_draw("2c", "2d");
    let bogus = vec![card("2s")];
    assert!(g.buy_insurance(leader, 50, &bogus).is_err());

    // Buying over the cap is refused too: nine outs allow at most
    // ceil(999 / 3.0) = 333.
    let all_hearts: Vec<Card> = g.find_player(leader).unwrap().insurance[0].outs.clone();
    assert!(g.buy_insurance(leader, 334, &all_hearts).is_err());
    assert!(g.buy_insurance(leader, 333, &all_hearts).is_ok());

    // Only one purchase per round.
    assert!(g.buy_insurance(leader, 10, &all_hearts).is_err());
}

#[test]
fn suspend_window_expires_into_resume() {
    let (mut g, _leader, _villain) = all_in_flush_draw("2c", "2d");
    // Nobody answers; the countdown runs out and play resumes.
    for _ in 0..100 {
        if table_state(&g) != Some(TableState::Suspend)
            && table_state(&g) != Some(TableState::Resume)
        {
            break;
        }
        g.tick();
    }
    assert_ne!(table_state(&g), Some(TableState::Suspend));
}

#[test]
fn full_buy_premium_is_owed_without_refund_on_blank() {
    let (mut g, leader, _villain) = all_in_flush_draw("2c", "2d");

    // Cover every out at the cap.
    let all_outs: Vec<Card> = g.find_player(leader).unwrap().insurance[0].outs.clone();
    g.buy_insurance(leader, 333, &all_outs).unwrap();

    // Decline the turn-round offer when it appears.
    for _ in 0..50 {
        if table_state(&g) == Some(TableState::Suspend)
            && g.first_table().unwrap().betround.wire_code() == 2
        {
            break;
        }
        g.tick();
    }
    g.buy_insurance(leader, 0, &[]).unwrap();

    run_to_end_round(&mut g);
    let out: Vec<Outgoing> = g.drain_outbox().into();

    // Full coverage missed: the whole premium is owed, no take-back.
    let benefits = snaps_to(&out, SnapCode::InsuranceBenefits);
    assert!(
        benefits.contains(&(Some(leader), "-333".to_string())),
        "got {benefits:?}"
    );
    assert_eq!(g.find_player(leader).unwrap().stake, 1000 - 333);
}
