//! The tick-driven TCP server.
//!
//! A single-threaded `mio` poll loop: each step drains ready sockets
//! and dispatches complete command lines, advances every game by one
//! state transition, fans the resulting snapshots out, and sweeps the
//! reconnect archive. No state is shared across threads and command
//! handlers never block.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use crate::config::ServerConfig;
use crate::game::entities::{Card, Chips, ClientId, GameId};
use crate::game::{GameController, GameVariant, OutKind, Outgoing, PlayerAction, Recipient, TickOutcome};
use crate::net::codec::{Tokenizer, extract_line};
use crate::net::messages::{ChatDest, Command, CreateSpec, ParseError, Request};
use crate::net::session::{ConnectionArchive, FloodVerdict, Session};
use crate::protocol::{
    SERVER_VERSION, SnapCode, VERSION_COMPAT, err, foyer, game_info, server_stats,
};

const LISTENER: Token = Token(0);
const READ_CHUNK: usize = 1024;
/// A client with this much unparsed input is not speaking the
/// protocol; its buffer is dropped like any other framing error.
const MAX_LINE_BUFFER: usize = 16 * 1024;
const ARCHIVE_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct ServerStats {
    started_unix: i64,
    clients_connected: u64,
    clients_introduced: u64,
    clients_incompatible: u64,
    games_created: u64,
}

struct Connection {
    socket: TcpStream,
    session: Session,
    inbuf: Vec<u8>,
    outbuf: Vec<u8>,
    /// Flush what is queued, then drop the connection.
    closing: bool,
    dead: bool,
}

impl Connection {
    fn new(socket: TcpStream) -> Self {
        Self {
            socket,
            session: Session::new(),
            inbuf: Vec::new(),
            outbuf: Vec::new(),
            closing: false,
            dead: false,
        }
    }
}

pub struct Server {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    connections: HashMap<Token, Connection>,
    next_token: usize,

    games: BTreeMap<GameId, GameController>,
    archive: ConnectionArchive,
    config: ServerConfig,
    config_path: Option<PathBuf>,
    stats: ServerStats,
    last_archive_sweep: Instant,
}

impl Server {
    pub fn bind(addr: SocketAddr, config: ServerConfig) -> io::Result<Self> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(addr)?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        info!("listening on {}", listener.local_addr()?);
        Ok(Self {
            poll,
            events: Events::with_capacity(256),
            listener,
            connections: HashMap::new(),
            next_token: 1,
            games: BTreeMap::new(),
            archive: ConnectionArchive::default(),
            config,
            config_path: None,
            stats: ServerStats {
                started_unix: chrono::Utc::now().timestamp(),
                ..ServerStats::default()
            },
            last_archive_sweep: Instant::now(),
        })
    }

    /// Where `CONFIG save` writes to.
    pub fn set_config_path(&mut self, path: PathBuf) {
        self.config_path = Some(path);
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn run(&mut self) -> io::Result<()> {
        loop {
            self.step(DEFAULT_POLL_TIMEOUT)?;
        }
    }

    /// One server tick: sockets, then games, then housekeeping.
    pub fn step(&mut self, timeout: Duration) -> io::Result<()> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }

        let ready: Vec<(Token, bool, bool)> = self
            .events
            .iter()
            .map(|ev| (ev.token(), ev.is_readable(), ev.is_writable()))
            .collect();

        for (token, readable, writable) in ready {
            if token == LISTENER {
                self.accept_clients();
                continue;
            }
            if readable {
                self.read_client(token);
            }
            if writable {
                self.flush_client(token);
            }
        }

        self.tick_games();

        if self.last_archive_sweep.elapsed() >= ARCHIVE_SWEEP_INTERVAL {
            let expire = self.config.get_int("conarchive_expire");
            self.archive.sweep(chrono::Utc::now().timestamp(), expire);
            self.last_archive_sweep = Instant::now();
        }

        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in tokens {
            self.flush_client(token);
        }
        self.reap_connections();
        Ok(())
    }

    // --- socket plumbing -----------------------------------------------

    fn accept_clients(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut socket, addr)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    if let Err(e) = self.poll.registry().register(
                        &mut socket,
                        token,
                        Interest::READABLE | Interest::WRITABLE,
                    ) {
                        error!("failed to register client socket: {e}");
                        continue;
                    }
                    info!("connection from {addr}");
                    self.connections.insert(token, Connection::new(socket));
                    self.stats.clients_connected += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("accept failed: {e}");
                    break;
                }
            }
        }
    }

    fn read_client(&mut self, token: Token) {
        loop {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            let mut chunk = [0u8; READ_CHUNK];
            match conn.socket.read(&mut chunk) {
                Ok(0) => {
                    conn.dead = true;
                    break;
                }
                Ok(n) => {
                    if conn.inbuf.len() + n > MAX_LINE_BUFFER {
                        warn!("client buffer size exceeded, dropping input");
                        conn.inbuf.clear();
                    }
                    conn.inbuf.extend_from_slice(&chunk[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!("read error, dropping connection: {e}");
                    conn.dead = true;
                    break;
                }
            }
        }

        loop {
            let line = {
                let Some(conn) = self.connections.get_mut(&token) else {
                    return;
                };
                if conn.dead || conn.closing {
                    return;
                }
                extract_line(&mut conn.inbuf)
            };
            match line {
                Some(line) => self.handle_line(token, &line),
                None => break,
            }
        }
    }

    fn flush_client(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        while !conn.outbuf.is_empty() {
            match conn.socket.write(&conn.outbuf) {
                Ok(0) => {
                    conn.dead = true;
                    return;
                }
                Ok(n) => {
                    conn.outbuf.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!("write error, dropping connection: {e}");
                    conn.dead = true;
                    return;
                }
            }
        }
    }

    fn reap_connections(&mut self) {
        let doomed: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, c)| c.dead || (c.closing && c.outbuf.is_empty()))
            .map(|(t, _)| *t)
            .collect();
        for token in doomed {
            self.remove_client(token);
        }
    }

    fn remove_client(&mut self, token: Token) {
        let Some(mut conn) = self.connections.remove(&token) else {
            return;
        };
        let _ = self.poll.registry().deregister(&mut conn.socket);
        info!("connection closed (cid {})", conn.session.id);

        if !conn.session.sent_info {
            return;
        }
        let cid = conn.session.id;

        // Players vanish from games that have not started; a seated
        // player in a running game stays and times out instead.
        let waiting: Vec<GameId> = self
            .games
            .iter()
            .filter(|(_, g)| !g.is_started() && g.is_player(cid))
            .map(|(gid, _)| *gid)
            .collect();
        for gid in waiting {
            if let Some(g) = self.games.get_mut(&gid) {
                let _ = g.remove_player(cid);
            }
        }

        if !conn.session.uuid.is_empty() {
            self.archive
                .mark_logout(&conn.session.uuid, chrono::Utc::now().timestamp());
        }

        let payload = format!("{} {} \"{}\"", foyer::LEAVE, cid, conn.session.info.name);
        self.broadcast_foyer(&payload);
    }

    // --- outbound helpers ----------------------------------------------

    fn token_of(&self, cid: ClientId) -> Option<Token> {
        self.connections
            .iter()
            .find(|(_, c)| c.session.introduced && c.session.id == cid && !c.dead)
            .map(|(t, _)| *t)
    }

    fn queue_line(&mut self, token: Token, line: &str) {
        if let Some(conn) = self.connections.get_mut(&token) {
            if conn.dead {
                return;
            }
            conn.outbuf.extend_from_slice(line.as_bytes());
            conn.outbuf.extend_from_slice(b"\r\n");
        }
    }

    fn queue_to_cid(&mut self, cid: ClientId, line: &str) {
        if let Some(token) = self.token_of(cid) {
            self.queue_line(token, line);
        }
    }

    fn broadcast_foyer(&mut self, payload: &str) {
        let line = format!("SNAP -1:-1 {} {}", SnapCode::Foyer.wire_code(), payload);
        let tokens: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, c)| c.session.introduced)
            .map(|(t, _)| *t)
            .collect();
        for token in tokens {
            self.queue_line(token, &line);
        }
    }

    fn send_response(&mut self, token: Token, ok: bool, code: u8, text: &str) {
        let msgid = self
            .connections
            .get(&token)
            .and_then(|c| c.session.last_msgid);
        let status = if ok { "OK" } else { "ERR" };
        let line = match msgid {
            Some(id) => format!("{id} {status} {code} {text}"),
            None => format!("{status} {code} {text}"),
        };
        self.queue_line(token, line.trim_end());
    }

    fn send_ok(&mut self, token: Token, text: &str) {
        self.send_response(token, true, err::OK, text);
    }

    fn send_err(&mut self, token: Token, code: u8, text: &str) {
        self.send_response(token, false, code, text);
    }

    /// Server-originated chat, rendered as coming from the foyer.
    fn chat_from_server(&mut self, cid: ClientId, text: &str) {
        let line = format!("MSG -1 foyer {text}");
        self.queue_to_cid(cid, &line);
    }

    fn close_after_flush(&mut self, token: Token) {
        if let Some(conn) = self.connections.get_mut(&token) {
            conn.closing = true;
        }
    }

    // --- line dispatch -------------------------------------------------

    fn handle_line(&mut self, token: Token, line: &str) {
        let mut t = Tokenizer::new(line);
        if t.is_empty() {
            return;
        }

        // An optional numeric message id leads the line and is echoed
        // on the response.
        let msgid: Option<i64> = match t.peek() {
            Some(tok) if !tok.is_empty() && tok.chars().all(|c| c.is_ascii_digit()) => {
                let id = tok.parse().ok();
                t.next();
                id
            }
            _ => None,
        };
        let (introduced, authed) = {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            conn.session.last_msgid = msgid;
            (conn.session.introduced, conn.session.authed)
        };

        let command = match Command::parse(&mut t, authed) {
            Ok(command) => command,
            Err(ParseError::Parameters) => {
                self.send_err(token, err::PARAMETERS, "");
                return;
            }
            Err(ParseError::NotImplemented) => {
                if introduced {
                    self.send_err(token, err::NOT_IMPLEMENTED, "not implemented");
                } else {
                    self.send_err(token, err::PROTOCOL, "protocol error");
                    self.close_after_flush(token);
                }
                return;
            }
        };

        if !introduced && !matches!(command, Command::Pclient { .. }) {
            self.send_err(token, err::PROTOCOL, "protocol error");
            self.close_after_flush(token);
            return;
        }

        match command {
            Command::Pclient { version, uuid, cid } => self.cmd_pclient(token, version, &uuid, cid),
            Command::Info(pairs) => self.cmd_info(token, &pairs),
            Command::Chat { dest, text } => self.cmd_chat(token, &dest, &text),
            Command::Request(request) => self.cmd_request(token, &request),
            Command::Rebuy { gid, stake, cid } => self.cmd_rebuy(token, gid, stake, cid),
            Command::Respite { gid, secs } => self.cmd_respite(token, gid, secs),
            Command::Register {
                gid,
                stake,
                password,
            } => self.cmd_register(token, gid, stake, password.as_deref()),
            Command::Unregister { gid } => self.cmd_unregister(token, gid),
            Command::Subscribe { gid, password } => {
                self.cmd_subscribe(token, gid, password.as_deref());
            }
            Command::Unsubscribe { gid } => self.cmd_unsubscribe(token, gid),
            Command::Action {
                gid,
                action,
                amount,
            } => self.cmd_action(token, gid, action, amount),
            Command::Straddle { gid } => self.cmd_straddle(token, gid),
            Command::BuyInsurance { gid, amount, cards } => {
                self.cmd_buy_insurance(token, gid, amount, &cards);
            }
            Command::Create(spec) => self.cmd_create(token, spec),
            Command::Auth { kind, password } => self.cmd_auth(token, kind, &password),
            Command::Config { action, key, value } => {
                self.cmd_config(token, &action, &key, value.as_deref());
            }
            Command::Quit => {
                self.send_ok(token, "");
                self.close_after_flush(token);
            }
        }
    }

    // --- handshake and session commands --------------------------------

    fn cmd_pclient(&mut self, token: Token, version: u32, uuid: &str, cid: ClientId) {
        if version < VERSION_COMPAT {
            info!("client version {version} too old");
            self.stats.clients_incompatible += 1;
            self.send_err(
                token,
                err::WRONG_VERSION,
                "The client version is too old. Please update your client.",
            );
            self.close_after_flush(token);
            return;
        }

        self.send_ok(token, "");

        let mut use_prev_cid = false;
        let mut uuid_inuse = false;
        let mut assigned = cid;

        if !uuid.is_empty() {
            match self.archive.lookup(uuid) {
                Some(entry) => {
                    if self.token_of(entry.id).is_some() {
                        info!("uuid '{uuid}' already connected; used by cid {}", entry.id);
                        uuid_inuse = true;
                    } else {
                        assigned = entry.id;
                        use_prev_cid = true;
                        info!("using previous cid {assigned} for uuid '{uuid}'");
                    }
                }
                None => info!("reserving uuid '{uuid}'"),
            }
        }
        if !use_prev_cid && self.token_of(cid).is_some() {
            self.send_err(token, err::PROTOCOL, "client id already in use");
            self.close_after_flush(token);
            return;
        }

        {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            conn.session.version = version;
            conn.session.introduced = true;
            conn.session.id = assigned;
            // A uuid in use elsewhere is not this client's to keep.
            conn.session.uuid = if uuid_inuse { String::new() } else { uuid.to_string() };
            conn.session.info.name = format!("client_{assigned}");
        }
        self.stats.clients_introduced += 1;

        let line = format!(
            "PSERVER {SERVER_VERSION} {assigned} {}",
            chrono::Utc::now().timestamp()
        );
        self.queue_line(token, &line);

        if uuid_inuse {
            self.chat_from_server(assigned, "Warning: UUID is already in use.");
        }
    }

    fn cmd_info(&mut self, token: Token, pairs: &[(String, String)]) {
        let sent_info = {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            for (key, value) in pairs {
                match key.as_str() {
                    // A name change is only honored once per session.
                    "name" if !conn.session.sent_info => conn.session.info.name = value.clone(),
                    "location" => conn.session.info.location = value.clone(),
                    _ => {}
                }
            }
            conn.session.sent_info
        };

        self.send_ok(token, "");

        if !sent_info {
            let (cid, uuid, name) = {
                let Some(conn) = self.connections.get(&token) else {
                    return;
                };
                (
                    conn.session.id,
                    conn.session.uuid.clone(),
                    conn.session.info.name.clone(),
                )
            };
            if !uuid.is_empty() {
                self.archive.reserve(&uuid, cid);
            }
            let welcome = self.config.get("welcome_message").to_string();
            if !welcome.is_empty() {
                self.chat_from_server(cid, &welcome);
            }
            let payload = format!("{} {} \"{}\"", foyer::JOIN, cid, name);
            self.broadcast_foyer(&payload);
        }

        if let Some(conn) = self.connections.get_mut(&token) {
            conn.session.sent_info = true;
        }
    }

    fn cmd_chat(&mut self, token: Token, dest: &ChatDest, text: &str) {
        let now = chrono::Utc::now().timestamp();
        let interval = self.config.get_int("flood_chat_interval");
        let per_interval = self.config.get_int("flood_chat_per_interval") as u32;
        let mute = self.config.get_int("flood_chat_mute");

        let (verdict, from, name) = {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            (
                conn.session.flood_check(now, interval, per_interval, mute),
                conn.session.id,
                conn.session.info.name.clone(),
            )
        };
        match verdict {
            FloodVerdict::StillMuted => {
                self.send_err(token, err::OK, "you are still muted");
                return;
            }
            FloodVerdict::NowMuted => {
                info!("client {from} caught flooding the chat");
                self.send_err(token, err::OK, "you have been muted for some time");
                return;
            }
            FloodVerdict::Ok => {}
        }

        let delivered = match dest {
            ChatDest::Client(to) => {
                let line = format!("MSG {from} \"{name}\" {text}");
                if let Some(target) = self.token_of(*to) {
                    self.queue_line(target, &line);
                    true
                } else {
                    false
                }
            }
            ChatDest::Game { gid, tid } => {
                match self.games.get(gid).map(GameController::listener_list) {
                    Some(listeners) => {
                        let line = format!("MSG {gid}:{tid}:{from} \"{name}\" {text}");
                        for cid in listeners {
                            self.queue_to_cid(cid, &line);
                        }
                        true
                    }
                    None => false,
                }
            }
        };

        if delivered {
            self.send_ok(token, "");
        } else {
            self.send_err(token, err::OK, "");
        }
    }

    // --- information requests ------------------------------------------

    fn gameinfo_line(g: &GameController, cid: ClientId) -> String {
        let state = if g.is_ended() {
            game_info::STATE_ENDED
        } else if g.is_started() {
            game_info::STATE_STARTED
        } else if g.is_paused() {
            game_info::STATE_PAUSED
        } else {
            game_info::STATE_WAITING
        };
        let mut flags = 0u8;
        if g.is_player(cid) {
            flags |= game_info::FLAG_REGISTERED;
        }
        if g.is_spectator(cid) {
            flags |= game_info::FLAG_SUBSCRIBED;
        }
        if g.has_password() {
            flags |= game_info::FLAG_PASSWORD;
        }
        if g.owner() == cid {
            flags |= game_info::FLAG_OWNER;
        }
        if g.restart() {
            flags |= game_info::FLAG_RESTART;
        }
        let c = g.config();
        format!(
            "GAMEINFO {} {}:{}:{}:{} {}:{}:{}:{}:{}:{}:{}:{}:{}:{} \"{}\"",
            g.game_id(),
            game_info::TYPE_HOLDEM,
            g.variant().wire_mode(),
            state,
            flags,
            c.max_players,
            g.player_count(),
            c.timeout_secs,
            c.player_stakes,
            c.blinds_start,
            c.blinds_factor,
            c.blinds_time_secs,
            c.ante,
            u8::from(c.mandatory_straddle),
            u8::from(c.enable_insurance),
            c.name,
        )
    }

    fn send_gameinfo(&mut self, token: Token, gid: GameId) -> bool {
        let cid = self
            .connections
            .get(&token)
            .map_or(-1, |c| c.session.id);
        let Some(g) = self.games.get(&gid) else {
            return false;
        };
        let line = Self::gameinfo_line(g, cid);
        self.queue_line(token, &line);
        true
    }

    fn send_playerlist(&mut self, token: Token, gid: GameId) -> bool {
        let Some(g) = self.games.get(&gid) else {
            return false;
        };
        let entries = g.player_list_entries().join(" ");
        let line = format!("PLAYERLIST {gid} {entries}");
        self.queue_line(token, &line);
        true
    }

    /// Push the player list to every registered player of a game.
    fn broadcast_playerlist(&mut self, gid: GameId) {
        let Some(g) = self.games.get(&gid) else {
            return;
        };
        let entries = g.player_list_entries().join(" ");
        let players = g.player_list(false);
        let line = format!("PLAYERLIST {gid} {entries}");
        for cid in players {
            self.queue_to_cid(cid, &line);
        }
    }

    fn cmd_request(&mut self, token: Token, request: &Request) {
        let ok = match request {
            Request::ClientInfo(cids) => {
                for cid in cids {
                    if let Some(target) = self.token_of(*cid) {
                        let line = {
                            let Some(conn) = self.connections.get(&target) else {
                                continue;
                            };
                            format!(
                                "CLIENTINFO {} \"name:{}\" \"location:{}\"",
                                cid, conn.session.info.name, conn.session.info.location
                            )
                        };
                        self.queue_line(token, &line);
                    }
                }
                true
            }
            Request::GameInfo(gids) => {
                for gid in gids {
                    self.send_gameinfo(token, *gid);
                }
                true
            }
            Request::GameList => {
                let gids = self
                    .games
                    .keys()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                self.queue_line(token, &format!("GAMELIST {gids}"));
                true
            }
            Request::PlayerList(gid) => self.send_playerlist(token, *gid),
            Request::ServerInfo => {
                let line = format!(
                    "SERVERINFO {}:{} {}:{} {}:{} {}:{} {}:{} {}:{} {}:{} {}:{}",
                    server_stats::SERVER_STARTED,
                    self.stats.started_unix,
                    server_stats::CLIENTS_CONNECTED,
                    self.stats.clients_connected,
                    server_stats::CLIENTS_INTRODUCED,
                    self.stats.clients_introduced,
                    server_stats::CLIENTS_INCOMPATIBLE,
                    self.stats.clients_incompatible,
                    server_stats::GAMES_CREATED,
                    self.stats.games_created,
                    server_stats::CLIENT_COUNT,
                    self.connections.len(),
                    server_stats::GAMES_COUNT,
                    self.games.len(),
                    server_stats::CONARCHIVE_COUNT,
                    self.archive.len(),
                );
                self.queue_line(token, &line);
                true
            }
            Request::Start(gid) => {
                let cid = self.session_cid(token);
                let authed = self.session_authed(token);
                match self.games.get_mut(gid) {
                    Some(g) if g.owner() == cid || authed => {
                        g.start();
                        self.send_ok(token, &gid.to_string());
                        self.deliver_game_output(*gid);
                        true
                    }
                    _ => false,
                }
            }
            Request::Restart(gid, restart) => {
                let authed = self.session_authed(token);
                match self.games.get_mut(gid) {
                    Some(g) if authed => {
                        g.set_restart(*restart);
                        true
                    }
                    _ => false,
                }
            }
            Request::Pause(gid) => {
                let cid = self.session_cid(token);
                let authed = self.session_authed(token);
                match self.games.get_mut(gid) {
                    Some(g) if g.owner() == cid || authed => {
                        g.pause();
                        self.deliver_game_output(*gid);
                        true
                    }
                    _ => false,
                }
            }
            Request::Resume(gid) => {
                let cid = self.session_cid(token);
                let authed = self.session_authed(token);
                match self.games.get_mut(gid) {
                    Some(g) if g.owner() == cid || authed => {
                        g.resume();
                        self.deliver_game_output(*gid);
                        true
                    }
                    _ => false,
                }
            }
        };

        if !ok {
            self.send_err(token, err::OK, "");
        }
    }

    fn session_cid(&self, token: Token) -> ClientId {
        self.connections.get(&token).map_or(-1, |c| c.session.id)
    }

    fn session_authed(&self, token: Token) -> bool {
        self.connections.get(&token).is_some_and(|c| c.session.authed)
    }

    // --- game commands -------------------------------------------------

    fn cmd_register(&mut self, token: Token, gid: GameId, stake: Chips, password: Option<&str>) {
        let cid = self.session_cid(token);
        let uuid = self
            .connections
            .get(&token)
            .map_or(String::new(), |c| c.session.uuid.clone());

        let Some(g) = self.games.get(&gid) else {
            self.send_err(token, err::OK, "game does not exist");
            return;
        };
        if g.is_started() && g.variant() != GameVariant::Cash {
            self.send_err(token, err::OK, "cannot join game after it's started");
            return;
        }
        if !g.check_password(password.unwrap_or("")) {
            self.send_err(token, err::OK, "unable to register, wrong password");
            return;
        }

        if g.is_player(cid) {
            if g.variant() == GameVariant::Cash {
                // A returning player takes their seat back.
                let resumed = self
                    .games
                    .get_mut(&gid)
                    .is_some_and(|g| g.resume_player(cid).is_ok());
                if resumed {
                    self.send_ok(token, &gid.to_string());
                    self.send_gameinfo(token, gid);
                    self.broadcast_playerlist(gid);
                    self.deliver_game_output(gid);
                } else {
                    self.send_err(token, err::OK, "could not resume player");
                }
            } else {
                self.send_err(token, err::OK, "you are already registered");
            }
            return;
        }

        let register_limit = self.config.get_int("max_register_per_player") as usize;
        let registered = self.games.values().filter(|g| g.is_player(cid)).count();
        if registered >= register_limit {
            self.send_err(token, err::OK, "register limit per player is reached");
            return;
        }

        let result = self
            .games
            .get_mut(&gid)
            .map(|g| g.add_player(cid, &uuid, stake));
        match result {
            Some(Ok(())) => {
                let (count, max) = self
                    .games
                    .get(&gid)
                    .map_or((0, 0), |g| (g.player_count(), g.config().max_players));
                info!("client {cid} joined game {gid} ({count}/{max})");
                self.send_ok(token, &gid.to_string());
                self.send_gameinfo(token, gid);
                self.broadcast_playerlist(gid);
                self.deliver_game_output(gid);
            }
            Some(Err(e)) => self.send_err(token, err::OK, &e.to_string()),
            None => self.send_err(token, err::OK, "game does not exist"),
        }
    }

    fn unregister_game(&mut self, token: Token, gid: GameId) {
        let cid = self.session_cid(token);
        let Some(g) = self.games.get(&gid) else {
            self.send_err(token, err::OK, "game does not exist");
            return;
        };
        if !g.is_player(cid) {
            self.send_err(token, err::OK, "you are not registered");
            return;
        }
        if !g.is_created() && g.variant() != GameVariant::Cash {
            self.send_err(
                token,
                err::OK,
                "leaving is not allowed once the game has started",
            );
            return;
        }
        let removed = self
            .games
            .get_mut(&gid)
            .is_some_and(|g| g.remove_player(cid).is_ok());
        if removed {
            info!("client {cid} parted game {gid}");
            self.broadcast_playerlist(gid);
            self.send_ok(token, "");
        } else {
            self.send_err(token, err::OK, "unable to unregister");
        }
    }

    fn cmd_unregister(&mut self, token: Token, gid: GameId) {
        if gid != -1 {
            self.unregister_game(token, gid);
            return;
        }
        let cid = self.session_cid(token);
        let gids: Vec<GameId> = self
            .games
            .iter()
            .filter(|(_, g)| g.is_player(cid))
            .map(|(gid, _)| *gid)
            .collect();
        for gid in gids {
            self.unregister_game(token, gid);
        }
    }

    fn cmd_subscribe(&mut self, token: Token, gid: GameId, password: Option<&str>) {
        let cid = self.session_cid(token);
        let Some(g) = self.games.get(&gid) else {
            self.send_err(token, err::OK, "game does not exist");
            return;
        };
        if g.is_spectator(cid) {
            self.send_err(token, err::OK, "you are already subscribed");
            return;
        }
        if !g.check_password(password.unwrap_or("")) {
            self.send_err(token, err::OK, "unable to subscribe, wrong password");
            return;
        }
        let subscribe_limit = self.config.get_int("max_subscribe_per_player") as usize;
        let subscribed = self.games.values().filter(|g| g.is_spectator(cid)).count();
        if subscribed >= subscribe_limit {
            self.send_err(token, err::OK, "subscribe limit per player is reached");
            return;
        }
        let added = self
            .games
            .get_mut(&gid)
            .is_some_and(|g| g.add_spectator(cid).is_ok());
        if added {
            info!("client {cid} subscribed game {gid}");
            self.send_ok(token, "");
        } else {
            self.send_err(token, err::OK, "unable to subscribe");
        }
    }

    fn cmd_unsubscribe(&mut self, token: Token, gid: GameId) {
        let cid = self.session_cid(token);
        let removed = match self.games.get_mut(&gid) {
            Some(g) => g.remove_spectator(cid).is_ok(),
            None => {
                self.send_err(token, err::OK, "game does not exist");
                return;
            }
        };
        if removed {
            self.send_ok(token, "");
        } else {
            self.send_err(token, err::OK, "you are not subscribed");
        }
    }

    fn cmd_action(&mut self, token: Token, gid: GameId, action: PlayerAction, amount: Chips) {
        let cid = self.session_cid(token);
        let Some(g) = self.games.get_mut(&gid) else {
            self.send_err(token, err::OK, "game does not exist");
            return;
        };
        if g.set_player_action(cid, action, amount).is_err() {
            self.send_err(token, err::OK, "you are not registered");
            return;
        }
        // Coming back from sitout refreshes the requester's view.
        if action == PlayerAction::Back {
            self.send_playerlist(token, gid);
        }
    }

    fn cmd_rebuy(&mut self, token: Token, gid: GameId, stake: Chips, player_cid: ClientId) {
        let Some(g) = self.games.get_mut(&gid) else {
            self.send_err(token, err::OK, "game does not exist");
            return;
        };
        if !g.is_player(player_cid) {
            self.send_err(token, err::OK, "you are not registered");
            return;
        }
        if g.rebuy(player_cid, stake).is_err() {
            self.send_err(token, err::OK, "unable to rebuy");
            return;
        }
        info!("player {player_cid} rebought stake {stake} in game {gid}");
    }

    fn cmd_respite(&mut self, token: Token, gid: GameId, secs: u64) {
        let cid = self.session_cid(token);
        let Some(g) = self.games.get_mut(&gid) else {
            self.send_err(token, err::OK, "game does not exist");
            return;
        };
        if !g.is_player(cid) {
            self.send_err(token, err::OK, "you are not registered");
            return;
        }
        if g.add_timeout(cid, secs).is_err() {
            self.send_err(token, err::OK, "unable to add timeout");
            return;
        }
        info!("player {cid} added timeout {secs} in game {gid}");
        self.deliver_game_output(gid);
    }

    fn cmd_straddle(&mut self, token: Token, gid: GameId) {
        let cid = self.session_cid(token);
        let Some(g) = self.games.get_mut(&gid) else {
            self.send_err(token, err::OK, "game does not exist");
            return;
        };
        if !g.is_player(cid) {
            self.send_err(token, err::OK, "you are not registered");
            return;
        }
        if g.next_round_straddle(cid).is_err() {
            self.send_err(token, err::OK, "unable to straddle");
            return;
        }
        info!("player {cid} declared a straddle in game {gid}");
        self.deliver_game_output(gid);
    }

    fn cmd_buy_insurance(&mut self, token: Token, gid: GameId, amount: Chips, cards: &[Card]) {
        let cid = self.session_cid(token);
        let Some(g) = self.games.get_mut(&gid) else {
            self.send_err(token, err::OK, "game does not exist");
            return;
        };
        if !g.is_player(cid) {
            self.send_err(token, err::OK, "you are not registered");
            return;
        }
        if g.buy_insurance(cid, amount, cards).is_err() {
            self.send_err(token, err::OK, "unable to buy insurance");
        }
    }

    fn cmd_create(&mut self, token: Token, spec: CreateSpec) {
        let cid = self.session_cid(token);
        if !self.config.get_bool("perm_create_user") && !self.session_authed(token) {
            self.send_err(token, err::NO_PERMISSION, "no permission");
            return;
        }
        if self.games.len() >= self.config.get_int("max_games") as usize {
            self.send_err(token, err::OK, "server games count reached");
            return;
        }
        let create_limit = self.config.get_int("max_create_per_player") as usize;
        let created = self.games.values().filter(|g| g.owner() == cid).count();
        if created >= create_limit {
            self.send_err(token, err::OK, "create limit per player is reached");
            return;
        }
        if self.games.contains_key(&spec.game_id) {
            self.send_err(token, err::OK, "game already exists");
            return;
        }

        let gid = spec.game_id;
        let mut config = spec.config;
        config.owner = cid;
        let enable_insurance = config.enable_insurance;
        let mut game = GameController::new(gid, spec.variant, config);
        if self.config.get_bool("dbg_instant_pacing") {
            game.set_pacing(crate::game::Pacing::instant());
        }
        self.games.insert(gid, game);
        self.stats.games_created += 1;
        info!("client {cid} created game {gid}, enable_insurance={enable_insurance}");

        self.send_gameinfo(token, gid);
        self.send_playerlist(token, gid);
    }

    fn cmd_auth(&mut self, token: Token, kind: i32, password: &str) {
        let configured = self.config.get("auth_password").to_string();
        // -1 selects server-level auth.
        if kind == -1 && !configured.is_empty() && password == configured {
            if let Some(conn) = self.connections.get_mut(&token) {
                conn.session.authed = true;
            }
            info!("client {} has been authed", self.session_cid(token));
            self.send_ok(token, "");
        } else {
            self.send_err(token, err::OK, "auth failed");
        }
    }

    fn cmd_config(&mut self, token: Token, action: &str, key: &str, value: Option<&str>) {
        if !self.session_authed(token) {
            self.send_err(token, err::OK, "config request failed");
            return;
        }
        let cid = self.session_cid(token);
        match action {
            "get" => {
                let text = if self.config.exists(key) {
                    format!("Config: {key}={}", self.config.get(key))
                } else {
                    format!("Config: {key} not set")
                };
                self.chat_from_server(cid, &text);
                self.send_ok(token, "");
            }
            "set" => {
                let value = value.unwrap_or("");
                self.config.set(key, value);
                info!("client {cid} set config '{key}' to '{value}'");
                self.send_ok(token, "");
            }
            "save" => {
                let path = self
                    .config_path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("server.cfg"));
                match self.config.save(&path) {
                    Ok(()) => {
                        self.chat_from_server(cid, "Config saved");
                        self.send_ok(token, "");
                    }
                    Err(e) => {
                        error!("config save failed: {e}");
                        self.send_err(token, err::OK, "config request failed");
                    }
                }
            }
            _ => self.send_err(token, err::OK, "config request failed"),
        }
    }

    // --- game advancement ----------------------------------------------

    fn tick_games(&mut self) {
        let gids: Vec<GameId> = self.games.keys().copied().collect();
        for gid in gids {
            let outcome = match self.games.get_mut(&gid) {
                Some(g) => g.tick(),
                None => continue,
            };
            self.deliver_game_output(gid);

            if outcome == TickOutcome::Closed {
                self.finish_game(gid);
            }
        }
    }

    /// Drain one game's outbox into the client write queues.
    fn deliver_game_output(&mut self, gid: GameId) {
        let (outgoing, listeners) = match self.games.get_mut(&gid) {
            Some(g) => (g.drain_outbox(), g.listener_list()),
            None => return,
        };
        for out in outgoing {
            let Outgoing { to, tid, kind } = out;
            let line = match kind {
                OutKind::Snap { code, payload } => {
                    format!("SNAP {gid}:{tid} {} {payload}", code.wire_code())
                }
                OutKind::Chat { text } => {
                    let scope = if tid == -1 { "game" } else { "table" };
                    format!("MSG {gid}:{tid} {scope} {text}")
                }
            };
            match to {
                Recipient::Listeners => {
                    for cid in &listeners {
                        self.queue_to_cid(*cid, &line);
                    }
                }
                Recipient::Client(cid) => self.queue_to_cid(cid, &line),
            }
        }
    }

    /// A game reported itself closed: tell the players, then retire or
    /// respawn it.
    fn finish_game(&mut self, gid: GameId) {
        let (players, respawn) = {
            let Some(g) = self.games.get_mut(&gid) else {
                return;
            };
            g.set_finished();
            (g.player_list(true), g.restart())
        };
        let lines: Vec<(ClientId, String)> = match self.games.get(&gid) {
            Some(g) => players
                .into_iter()
                .map(|cid| (cid, Self::gameinfo_line(g, cid)))
                .collect(),
            None => Vec::new(),
        };
        for (cid, line) in lines {
            self.queue_to_cid(cid, &line);
        }

        if respawn {
            if let Some(old) = self.games.remove(&gid) {
                info!("restarting game {gid}");
                let game = GameController::new(gid, old.variant(), old.config().clone());
                self.games.insert(gid, game);
            }
        } else {
            info!("deleting game {gid}");
            self.games.remove(&gid);
        }
    }

    // --- test hooks ----------------------------------------------------

    /// Direct registry access for tests and tooling.
    #[must_use]
    pub fn game(&self, gid: GameId) -> Option<&GameController> {
        self.games.get(&gid)
    }

    pub fn game_mut(&mut self, gid: GameId) -> Option<&mut GameController> {
        self.games.get_mut(&gid)
    }

    pub fn insert_game(&mut self, game: GameController) {
        self.games.insert(game.game_id(), game);
    }

    #[must_use]
    pub fn archive_len(&self) -> usize {
        self.archive.len()
    }

    /// Force an archive sweep regardless of the cadence timer.
    pub fn sweep_archive_now(&mut self) {
        let expire = self.config.get_int("conarchive_expire");
        self.archive.sweep(chrono::Utc::now().timestamp(), expire);
    }
}
