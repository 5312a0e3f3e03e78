//! Loopback Flow Tests
//!
//! Wires the engine to `ServerHost` and the in-process authority exactly as
//! the binary does, but pumps the channels by hand so every round trip is
//! deterministic.

use std::sync::Arc;

use guild_core::config::{GuildConfig, StaticData};
use guild_core::guild::{Guild, GuildMember};
use guild_core::ports::Notification;
use guild_core::stronghold::StrongholdDef;
use guild_core::types::SessionId;
use guild_core::GuildAction;
use guild_core::GuildEngine;
use guild_server::bridge::{self, BridgeChannels, OutboundEvent, ServerHost};
use guild_server::metrics::ServerMetrics;
use guild_server::{LoopbackAuthority, SessionLogin, SessionRegistry};
use std::sync::atomic::Ordering;

struct Harness {
    engine: GuildEngine<ServerHost>,
    authority: LoopbackAuthority,
    channels: BridgeChannels,
    metrics: Arc<ServerMetrics>,
}

impl Harness {
    fn new() -> Self {
        let channels = bridge::create_bridge();
        let metrics = ServerMetrics::new();
        let castles = vec![StrongholdDef {
            id: 15,
            zone: "prtg_cas01".into(),
            name: "Kriemhild".into(),
            event: "Agit#prtg_cas01".into(),
        }];
        let host = ServerHost::new(
            SessionRegistry::with_siege_zones(castles.iter().map(|c| c.zone.clone())),
            channels.requests.clone(),
            channels.outbound.clone(),
            metrics.clone(),
        );
        let data = StaticData {
            castles,
            ..Default::default()
        };
        Self {
            engine: GuildEngine::new(host, GuildConfig::default(), data),
            authority: LoopbackAuthority::new(16),
            channels,
            metrics,
        }
    }

    fn login(&mut self, account_id: u32, char_id: u32, name: &str, token: bool) -> SessionId {
        let session = self
            .engine
            .host_mut()
            .sessions
            .connect(SessionLogin {
                account_id,
                char_id,
                name: name.into(),
                guild_id: 0,
                level: 50,
                class: 0,
                zone: "prontera".into(),
                x: 150,
                y: 150,
                has_creation_token: token,
            })
            .unwrap();
        self.engine.session_connected(session);
        session
    }

    /// Run requests through the authority until the engine stops asking
    fn settle(&mut self) {
        while let Ok(request) = self.channels.request_receiver.try_recv() {
            for reply in self.authority.handle(request) {
                self.engine.handle_reply(reply);
            }
        }
    }

    fn notifications_for(&mut self, session: SessionId) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(event) = self.channels.outbound_receiver.try_recv() {
            if let OutboundEvent::Notify {
                session: target,
                notification,
            } = event
            {
                if target == session {
                    out.push(notification);
                }
            }
        }
        out
    }
}

// ============================================================================
// Membership
// ============================================================================

#[test]
fn test_create_invite_accept_through_loopback() {
    let mut h = Harness::new();
    let founder = h.login(2000001, 150001, "Ava", true);
    let player = h.login(2000002, 150002, "Bryn", false);

    h.engine
        .dispatch(founder, GuildAction::Create { name: "Wolves".into() })
        .unwrap();
    h.settle();

    let guild_id = h.engine.host().sessions.get(founder).unwrap().guild_id;
    assert_ne!(guild_id, 0);
    assert_eq!(h.engine.lookup(guild_id).unwrap().member_count(), 1);
    assert!(h.authority.guild(guild_id).is_some());

    h.engine
        .dispatch(founder, GuildAction::Invite { target: player })
        .unwrap();
    h.engine
        .dispatch(player, GuildAction::AnswerInvite { accept: true })
        .unwrap();
    h.settle();

    assert_eq!(h.engine.lookup(guild_id).unwrap().member_count(), 2);
    assert_eq!(h.authority.guild(guild_id).unwrap().member_count(), 2);
    assert_eq!(h.engine.host().sessions.get(player).unwrap().guild_id, guild_id);
    assert!(h
        .notifications_for(player)
        .contains(&Notification::Joined { guild_id }));
    assert!(h.metrics.authority_requests.load(Ordering::Relaxed) >= 2);
}

#[test]
fn test_duplicate_name_is_refused_by_authority() {
    let mut h = Harness::new();
    // Known to the authority only, so the local name check passes
    h.authority.insert_guild(Guild::founded(
        40,
        "Wolves".into(),
        GuildMember {
            account_id: 2000009,
            char_id: 150009,
            name: "Elsewhere".into(),
            ..Default::default()
        },
        16,
    ));
    let founder = h.login(2000001, 150001, "Ava", true);

    h.engine
        .dispatch(founder, GuildAction::Create { name: "wolves".into() })
        .unwrap();
    h.settle();

    let session = h.engine.host().sessions.get(founder).unwrap();
    assert_eq!(session.guild_id, 0);
    assert!(session.has_creation_token);
    assert!(h.engine.guilds().is_empty());
    assert!(h
        .notifications_for(founder)
        .iter()
        .any(|n| matches!(n, Notification::Rejected { .. })));
}

#[test]
fn test_disconnect_marks_member_offline_on_authority() {
    let mut h = Harness::new();
    let founder = h.login(2000001, 150001, "Ava", true);
    h.engine
        .dispatch(founder, GuildAction::Create { name: "Wolves".into() })
        .unwrap();
    h.settle();
    let guild_id = h.engine.host().sessions.get(founder).unwrap().guild_id;

    assert!(h.engine.host_mut().sessions.begin_disconnect(founder));
    h.engine.session_closed(founder);
    h.engine.host_mut().sessions.remove(founder);
    h.settle();

    let record = h.authority.guild(guild_id).unwrap();
    assert!(!record.members[0].online);
    assert_eq!(h.engine.lookup(guild_id).unwrap().online_count(), 0);
}
