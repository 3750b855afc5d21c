//! The client command grammar.
//!
//! Each newline-framed line parses into one [`Command`]; the server
//! dispatches it into the game registry. Parsing is strict about
//! shapes and loose about values: semantic checks (does the game
//! exist, is the seat yours) stay with the dispatcher.

use thiserror::Error;

use super::codec::{Tokenizer, split_pair};
use crate::game::entities::{Card, Chips, ClientId, GameId, PlayerAction, TableId};
use crate::game::{GameConfig, GameVariant};

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ParseError {
    #[error("parameters")]
    Parameters,
    #[error("not implemented")]
    NotImplemented,
}

/// Where a `CHAT` line is headed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChatDest {
    Client(ClientId),
    Game { gid: GameId, tid: TableId },
}

/// `REQUEST` subcommands.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Request {
    ClientInfo(Vec<ClientId>),
    GameInfo(Vec<GameId>),
    GameList,
    PlayerList(GameId),
    ServerInfo,
    Start(GameId),
    Restart(GameId, bool),
    Pause(GameId),
    Resume(GameId),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Pclient {
        version: u32,
        uuid: String,
        cid: ClientId,
    },
    Info(Vec<(String, String)>),
    Chat {
        dest: ChatDest,
        text: String,
    },
    Request(Request),
    Rebuy {
        gid: GameId,
        stake: Chips,
        cid: ClientId,
    },
    Respite {
        gid: GameId,
        secs: u64,
    },
    Register {
        gid: GameId,
        stake: Chips,
        password: Option<String>,
    },
    Unregister {
        gid: GameId,
    },
    Subscribe {
        gid: GameId,
        password: Option<String>,
    },
    Unsubscribe {
        gid: GameId,
    },
    Action {
        gid: GameId,
        action: PlayerAction,
        amount: Chips,
    },
    Straddle {
        gid: GameId,
    },
    BuyInsurance {
        gid: GameId,
        amount: Chips,
        cards: Vec<Card>,
    },
    Create(CreateSpec),
    Auth {
        kind: i32,
        password: String,
    },
    Config {
        action: String,
        key: String,
        value: Option<String>,
    },
    Quit,
}

/// Parsed `CREATE` parameters, validated against the same limits the
/// original command set enforces.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateSpec {
    pub variant: GameVariant,
    pub game_id: GameId,
    pub config: GameConfig,
}

impl Command {
    /// Parse the command word and its arguments. The leading message
    /// id, if any, must already be consumed.
    pub fn parse(t: &mut Tokenizer, authed: bool) -> Result<Command, ParseError> {
        let word = t.next().ok_or(ParseError::Parameters)?;
        match word.as_str() {
            "PCLIENT" => {
                let version = t.next_parsed().ok_or(ParseError::Parameters)?;
                let uuid = t.next().ok_or(ParseError::Parameters)?;
                let cid = t.next_parsed().ok_or(ParseError::Parameters)?;
                Ok(Command::Pclient { version, uuid, cid })
            }
            "INFO" => {
                let mut pairs = Vec::new();
                while let Some(token) = t.next() {
                    let (key, value) = split_pair(&token);
                    if let Some(value) = value {
                        pairs.push((key.to_string(), value.to_string()));
                    }
                }
                Ok(Command::Info(pairs))
            }
            "CHAT" => {
                if t.remaining() < 2 {
                    return Err(ParseError::Parameters);
                }
                let dest_token = t.next().ok_or(ParseError::Parameters)?;
                let dest = match dest_token.split_once(':') {
                    None => ChatDest::Client(
                        dest_token.parse().map_err(|_| ParseError::Parameters)?,
                    ),
                    Some((gid, tid)) => ChatDest::Game {
                        gid: gid.parse().map_err(|_| ParseError::Parameters)?,
                        tid: tid.parse().map_err(|_| ParseError::Parameters)?,
                    },
                };
                Ok(Command::Chat {
                    dest,
                    text: t.rest(),
                })
            }
            "REQUEST" => Ok(Command::Request(parse_request(t)?)),
            "REBUY" => {
                let gid = t.next_parsed().ok_or(ParseError::Parameters)?;
                let stake = t.next_parsed().ok_or(ParseError::Parameters)?;
                let cid = t.next_parsed().ok_or(ParseError::Parameters)?;
                Ok(Command::Rebuy { gid, stake, cid })
            }
            "RESPITE" => {
                let gid = t.next_parsed().ok_or(ParseError::Parameters)?;
                let secs = t.next_parsed().ok_or(ParseError::Parameters)?;
                Ok(Command::Respite { gid, secs })
            }
            "REGISTER" => {
                let gid = t.next_parsed().ok_or(ParseError::Parameters)?;
                let stake = t.next_parsed().ok_or(ParseError::Parameters)?;
                Ok(Command::Register {
                    gid,
                    stake,
                    password: t.next(),
                })
            }
            "UNREGISTER" => {
                let gid = t.next_parsed().ok_or(ParseError::Parameters)?;
                Ok(Command::Unregister { gid })
            }
            "SUBSCRIBE" => {
                let gid = t.next_parsed().ok_or(ParseError::Parameters)?;
                Ok(Command::Subscribe {
                    gid,
                    password: t.next(),
                })
            }
            "UNSUBSCRIBE" => {
                let gid = t.next_parsed().ok_or(ParseError::Parameters)?;
                Ok(Command::Unsubscribe { gid })
            }
            "ACTION" => {
                let gid = t.next_parsed().ok_or(ParseError::Parameters)?;
                let word = t.next().ok_or(ParseError::Parameters)?;
                let action = PlayerAction::from_word(&word).ok_or(ParseError::Parameters)?;
                let amount = t.next_parsed().unwrap_or(0);
                Ok(Command::Action {
                    gid,
                    action,
                    amount,
                })
            }
            "STRADDLE" => {
                let gid = t.next_parsed().ok_or(ParseError::Parameters)?;
                Ok(Command::Straddle { gid })
            }
            "BUYINSURANCE" => {
                if t.remaining() < 3 {
                    return Err(ParseError::Parameters);
                }
                let gid = t.next_parsed().ok_or(ParseError::Parameters)?;
                let amount = t.next_parsed().ok_or(ParseError::Parameters)?;
                let mut cards = Vec::new();
                while let Some(token) = t.next() {
                    cards.push(token.parse().map_err(|_| ParseError::Parameters)?);
                }
                Ok(Command::BuyInsurance { gid, amount, cards })
            }
            "CREATE" => Ok(Command::Create(parse_create(t, authed)?)),
            "AUTH" => {
                let kind = t.next_parsed().ok_or(ParseError::Parameters)?;
                let password = t.next().ok_or(ParseError::Parameters)?;
                Ok(Command::Auth { kind, password })
            }
            "CONFIG" => {
                let action = t.next().ok_or(ParseError::Parameters)?;
                let key = t.next().unwrap_or_default();
                Ok(Command::Config {
                    action,
                    key,
                    value: t.next(),
                })
            }
            "QUIT" => Ok(Command::Quit),
            _ => Err(ParseError::NotImplemented),
        }
    }
}

fn parse_request(t: &mut Tokenizer) -> Result<Request, ParseError> {
    let word = t.next().ok_or(ParseError::Parameters)?;
    match word.as_str() {
        "clientinfo" => {
            let mut cids = Vec::new();
            while let Some(cid) = t.next_parsed() {
                cids.push(cid);
            }
            Ok(Request::ClientInfo(cids))
        }
        "gameinfo" => {
            let mut gids = Vec::new();
            while let Some(gid) = t.next_parsed() {
                gids.push(gid);
            }
            Ok(Request::GameInfo(gids))
        }
        "gamelist" => Ok(Request::GameList),
        "playerlist" => Ok(Request::PlayerList(
            t.next_parsed().ok_or(ParseError::Parameters)?,
        )),
        "serverinfo" => Ok(Request::ServerInfo),
        "start" => Ok(Request::Start(t.next_parsed().ok_or(ParseError::Parameters)?)),
        "restart" => {
            let gid = t.next_parsed().ok_or(ParseError::Parameters)?;
            let restart: i32 = t.next_parsed().ok_or(ParseError::Parameters)?;
            Ok(Request::Restart(gid, restart != 0))
        }
        "pause" => Ok(Request::Pause(t.next_parsed().ok_or(ParseError::Parameters)?)),
        "resume" => Ok(Request::Resume(t.next_parsed().ok_or(ParseError::Parameters)?)),
        _ => Err(ParseError::Parameters),
    }
}

fn parse_create(t: &mut Tokenizer, authed: bool) -> Result<CreateSpec, ParseError> {
    let mut variant = GameVariant::Sng;
    let mut game_id: GameId = 0;
    let mut config = GameConfig {
        name: "user_game".to_string(),
        max_players: 9,
        player_stakes: 1500,
        timeout_secs: 30,
        blinds_start: 20,
        blinds_factor: 20,
        blinds_time_secs: 180,
        expire_in_secs: 30 * 60,
        enable_insurance: true,
        ..GameConfig::default()
    };

    while let Some(token) = t.next() {
        let (key, value) = split_pair(&token);
        let Some(value) = value else { continue };
        match key {
            "type" => {
                variant = match value.parse::<u8>() {
                    Ok(v) if v == crate::protocol::game_info::MODE_RING => GameVariant::Cash,
                    Ok(v) if v == crate::protocol::game_info::MODE_SNG => GameVariant::Sng,
                    _ => return Err(ParseError::Parameters),
                };
            }
            "game_id" => {
                game_id = value.parse().map_err(|_| ParseError::Parameters)?;
                if game_id < 0 {
                    return Err(ParseError::Parameters);
                }
            }
            "players" => {
                config.max_players = value.parse().map_err(|_| ParseError::Parameters)?;
            }
            "stake" => {
                config.player_stakes = value.parse().map_err(|_| ParseError::Parameters)?;
                if config.player_stakes < 10 || config.player_stakes > 1_000_000 * 100 {
                    return Err(ParseError::Parameters);
                }
            }
            "timeout" => {
                config.timeout_secs = value.parse().map_err(|_| ParseError::Parameters)?;
                if config.timeout_secs < 5 || config.timeout_secs > 10 * 60 {
                    return Err(ParseError::Parameters);
                }
            }
            "name" => {
                let mut name = value.to_string();
                name.truncate(50);
                config.name = name;
            }
            "blinds_start" => {
                config.blinds_start = value.parse().map_err(|_| ParseError::Parameters)?;
                if config.blinds_start < 1 || config.blinds_start > 200 * 100 {
                    return Err(ParseError::Parameters);
                }
            }
            "blinds_factor" => {
                config.blinds_factor = value.parse().map_err(|_| ParseError::Parameters)?;
                if config.blinds_factor < 12 || config.blinds_factor > 40 {
                    return Err(ParseError::Parameters);
                }
            }
            "blinds_time" => {
                config.blinds_time_secs = value.parse().map_err(|_| ParseError::Parameters)?;
                if config.blinds_time_secs < 30 || config.blinds_time_secs > 30 * 60 {
                    return Err(ParseError::Parameters);
                }
            }
            "ante" => {
                config.ante = value.parse().map_err(|_| ParseError::Parameters)?;
            }
            "mandatory_straddle" => {
                config.mandatory_straddle = value.parse::<i32>().unwrap_or(0) != 0;
            }
            "password" => {
                let mut password = value.to_string();
                password.truncate(16);
                config.password = password;
            }
            "restart" => {
                // Only an authed client may ask for auto-restart.
                if !authed {
                    return Err(ParseError::Parameters);
                }
                config.restart = value.parse::<i32>().unwrap_or(0) != 0;
            }
            "expire_in" => {
                config.expire_in_secs = value.parse().map_err(|_| ParseError::Parameters)?;
            }
            "enable_insurance" => {
                config.enable_insurance = value.parse::<i32>().unwrap_or(0) != 0;
            }
            _ => {}
        }
    }

    let max = config.max_players;
    if max < 2 || (variant == GameVariant::Sng && max > 9) || max > 10 {
        return Err(ParseError::Parameters);
    }

    Ok(CreateSpec {
        variant,
        game_id,
        config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<Command, ParseError> {
        Command::parse(&mut Tokenizer::new(line), false)
    }

    fn parse_authed(line: &str) -> Result<Command, ParseError> {
        Command::parse(&mut Tokenizer::new(line), true)
    }

    #[test]
    fn pclient_line() {
        assert_eq!(
            parse("PCLIENT 902 9c1f-uuid 17"),
            Ok(Command::Pclient {
                version: 902,
                uuid: "9c1f-uuid".to_string(),
                cid: 17,
            })
        );
        assert_eq!(parse("PCLIENT 902"), Err(ParseError::Parameters));
    }

    #[test]
    fn info_pairs() {
        let cmd = parse(r#"INFO "name:Big Slick" location:berlin"#).unwrap();
        assert_eq!(
            cmd,
            Command::Info(vec![
                ("name".to_string(), "Big Slick".to_string()),
                ("location".to_string(), "berlin".to_string()),
            ])
        );
    }

    #[test]
    fn chat_to_client_and_game() {
        assert_eq!(
            parse("CHAT 5 hi there"),
            Ok(Command::Chat {
                dest: ChatDest::Client(5),
                text: "hi there".to_string(),
            })
        );
        assert_eq!(
            parse("CHAT 2:0 nice hand"),
            Ok(Command::Chat {
                dest: ChatDest::Game { gid: 2, tid: 0 },
                text: "nice hand".to_string(),
            })
        );
        assert_eq!(parse("CHAT 5"), Err(ParseError::Parameters));
    }

    #[test]
    fn requests() {
        assert_eq!(
            parse("REQUEST gameinfo 1 2 3"),
            Ok(Command::Request(Request::GameInfo(vec![1, 2, 3])))
        );
        assert_eq!(parse("REQUEST gamelist"), Ok(Command::Request(Request::GameList)));
        assert_eq!(
            parse("REQUEST playerlist 4"),
            Ok(Command::Request(Request::PlayerList(4)))
        );
        assert_eq!(
            parse("REQUEST restart 4 1"),
            Ok(Command::Request(Request::Restart(4, true)))
        );
        assert_eq!(parse("REQUEST dance"), Err(ParseError::Parameters));
    }

    #[test]
    fn actions() {
        assert_eq!(
            parse("ACTION 1 raise 120"),
            Ok(Command::Action {
                gid: 1,
                action: PlayerAction::Raise,
                amount: 120,
            })
        );
        assert_eq!(
            parse("ACTION 1 fold"),
            Ok(Command::Action {
                gid: 1,
                action: PlayerAction::Fold,
                amount: 0,
            })
        );
        assert_eq!(parse("ACTION 1 moonwalk"), Err(ParseError::Parameters));
    }

    #[test]
    fn buy_insurance_cards() {
        let cmd = parse("BUYINSURANCE 3 100 Ah Kd").unwrap();
        let Command::BuyInsurance { gid, amount, cards } = cmd else {
            panic!("wrong command");
        };
        assert_eq!(gid, 3);
        assert_eq!(amount, 100);
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].to_string(), "Ah");

        assert_eq!(parse("BUYINSURANCE 3 100 XX"), Err(ParseError::Parameters));
        assert_eq!(parse("BUYINSURANCE 3"), Err(ParseError::Parameters));
    }

    #[test]
    fn create_defaults() {
        let Command::Create(spec) = parse("CREATE type:3 game_id:7").unwrap() else {
            panic!("wrong command");
        };
        assert_eq!(spec.variant, GameVariant::Sng);
        assert_eq!(spec.game_id, 7);
        assert_eq!(spec.config.max_players, 9);
        assert_eq!(spec.config.player_stakes, 1500);
        assert!(spec.config.enable_insurance);
    }

    #[test]
    fn create_cash_game_with_extras() {
        let line = r#"CREATE type:1 game_id:2 players:6 stake:2000 ante:5 mandatory_straddle:1 expire_in:600 enable_insurance:0 name:"Deep Table""#;
        let Command::Create(spec) = parse(line).unwrap() else {
            panic!("wrong command");
        };
        assert_eq!(spec.variant, GameVariant::Cash);
        assert_eq!(spec.config.max_players, 6);
        assert_eq!(spec.config.ante, 5);
        assert!(spec.config.mandatory_straddle);
        assert_eq!(spec.config.expire_in_secs, 600);
        assert!(!spec.config.enable_insurance);
        assert_eq!(spec.config.name, "Deep Table");
    }

    #[test]
    fn create_rejects_bad_shapes() {
        assert_eq!(parse("CREATE type:2"), Err(ParseError::Parameters));
        assert_eq!(parse("CREATE players:1"), Err(ParseError::Parameters));
        assert_eq!(parse("CREATE type:3 players:10"), Err(ParseError::Parameters));
        assert_eq!(parse("CREATE stake:1"), Err(ParseError::Parameters));
        // restart is reserved to authed clients.
        assert_eq!(parse("CREATE restart:1"), Err(ParseError::Parameters));
        assert!(parse_authed("CREATE restart:1").is_ok());
    }

    #[test]
    fn unknown_command() {
        assert_eq!(parse("DANCE"), Err(ParseError::NotImplemented));
    }
}
