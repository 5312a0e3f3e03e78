//! Stronghold field traffic, bulk load, and the siege window.

use tracing::{debug, info, warn};

use super::GuildEngine;
use crate::constants::{MAX_GUARDIANS, SIEGE_END_EVENT, SIEGE_START_EVENT, WORLD_ACTIVATION_EVENT};
use crate::error::GuildError;
use crate::pending::DeferredAction;
use crate::ports::WorldHost;
use crate::protocol::{AuthorityRequest, StrongholdSnapshot};
use crate::stronghold::StrongholdField;
use crate::types::{CastleId, GuildId};

impl<H: WorldHost> GuildEngine<H> {
    /// Ask the authority for one field, optionally firing `event` once it lands
    pub fn load_stronghold_field(
        &mut self,
        castle_id: CastleId,
        index: u32,
        event: Option<&str>,
    ) -> Result<(), GuildError> {
        let field = StrongholdField::from_index(index).ok_or(GuildError::UnknownStrongholdField(index))?;
        if self.strongholds.lookup(castle_id).is_none() {
            return Err(GuildError::UnknownStronghold(castle_id));
        }
        match event {
            Some(name) => {
                self.field_events
                    .register((castle_id, field), DeferredAction::ScriptEvent(name.to_string()));
                self.request_field(castle_id, field);
            }
            None => self.send(AuthorityRequest::StrongholdFieldLoad {
                castle_id,
                field: index,
            }),
        }
        Ok(())
    }

    /// Write a field locally and persist it right away
    pub fn save_stronghold_field(&mut self, castle_id: CastleId, index: u32, value: u32) -> Result<(), GuildError> {
        let field = StrongholdField::from_index(index).ok_or(GuildError::UnknownStrongholdField(index))?;
        self.apply_stronghold_field(castle_id, field, value)?;
        self.strongholds.mark_persisted(castle_id, field);
        self.stats.stronghold_fields_persisted += 1;
        self.send(AuthorityRequest::StrongholdFieldSave {
            castle_id,
            field: index,
            value,
        });
        Ok(())
    }

    /// Combat-side hit point update. Persisted later by the drift job.
    pub fn set_guardian_hp(&mut self, castle_id: CastleId, slot: u8, hp: u32) -> Result<(), GuildError> {
        if slot as usize >= MAX_GUARDIANS {
            return Err(GuildError::UnknownStrongholdField(StrongholdField::GuardianHp(slot).index()));
        }
        self.strongholds
            .apply_field(castle_id, StrongholdField::GuardianHp(slot), hp)?;
        Ok(())
    }

    /// Mutate one field, fan out an ownership change, then drain the
    /// `(castle, field)` chain in registration order.
    pub(super) fn apply_stronghold_field(
        &mut self,
        castle_id: CastleId,
        field: StrongholdField,
        value: u32,
    ) -> Result<(), GuildError> {
        let change = self.strongholds.apply_field(castle_id, field, value)?;
        if change.owner_changed() {
            info!(castle_id, owner = value, previous = change.previous, "Stronghold changed hands");
            self.on_owner_changed(castle_id, value);
        }
        self.awaiting_fields.remove(&(castle_id, field));
        for action in self.field_events.take(&(castle_id, field)) {
            self.run_deferred(action);
        }
        Ok(())
    }

    /// Defenders re-resolve their affiliation once the owner is known locally
    fn on_owner_changed(&mut self, castle_id: CastleId, owner: GuildId) {
        if owner == 0 {
            self.refresh_defenders(castle_id);
            return;
        }
        self.defer_until_guild(owner, DeferredAction::RefreshDefenders(castle_id));
    }

    /// Startup batch of every stronghold's state
    pub(super) fn on_stronghold_data(&mut self, snapshots: Vec<StrongholdSnapshot>) {
        let mut owned: Vec<GuildId> = Vec::new();
        for snapshot in &snapshots {
            match self.strongholds.apply_snapshot(snapshot) {
                Ok(_) => {
                    self.strongholds.mark_all_persisted(snapshot.castle_id);
                    if snapshot.owner != 0 {
                        owned.push(snapshot.owner);
                    }
                }
                Err(err) => warn!(castle_id = snapshot.castle_id, %err, "Skipping stronghold snapshot"),
            }
        }
        info!(strongholds = snapshots.len(), owned = owned.len(), "Stronghold data loaded");

        let Some((&last, rest)) = owned.split_last() else {
            self.fire_event(WORLD_ACTIVATION_EVENT);
            return;
        };
        for &owner in rest {
            self.request_guild_info(owner);
        }
        // World activation waits for the last owner's data
        self.defer_until_guild(last, DeferredAction::ScriptEvent(WORLD_ACTIVATION_EVENT.to_string()));
    }

    /// Request the bulk load for every stronghold in the roster
    pub fn request_stronghold_data(&mut self) {
        let castle_ids = self.strongholds.ids();
        if castle_ids.is_empty() {
            debug!("Empty stronghold roster, activating world immediately");
            self.fire_event(WORLD_ACTIVATION_EVENT);
            return;
        }
        self.send(AuthorityRequest::StrongholdLoadAll { castle_ids });
    }

    // =====================================================
    // Siege window
    // =====================================================

    pub fn start_siege(&mut self) {
        if self.siege_active {
            return;
        }
        self.siege_active = true;
        info!("Siege window opened");
        self.stats.script_events_fired += 1;
        self.host.fire_for_all_strongholds(SIEGE_START_EVENT);
    }

    pub fn end_siege(&mut self) {
        if !self.siege_active {
            return;
        }
        self.siege_active = false;
        info!("Siege window closed");
        self.stats.script_events_fired += 1;
        self.host.fire_for_all_strongholds(SIEGE_END_EVENT);
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{GuildConfig, StaticData};
    use crate::constants::WORLD_ACTIVATION_EVENT;
    use crate::engine::GuildEngine;
    use crate::error::GuildError;
    use crate::guild::{Guild, GuildMember};
    use crate::protocol::{AuthorityReply, AuthorityRequest, StrongholdSnapshot};
    use crate::stronghold::{StrongholdDef, StrongholdField};
    use crate::testutil::TestHost;

    fn engine() -> GuildEngine<TestHost> {
        let castles = (1..=3)
            .map(|id| StrongholdDef {
                id,
                zone: format!("aldeg_cas0{id}"),
                name: format!("Castle {id}"),
                event: format!("Agit#aldeg_cas0{id}"),
            })
            .collect();
        let data = StaticData {
            castles,
            ..Default::default()
        };
        GuildEngine::new(TestHost::new(), GuildConfig::default(), data)
    }

    fn snapshot(castle_id: u32, owner: u32) -> StrongholdSnapshot {
        StrongholdSnapshot {
            castle_id,
            owner,
            ..Default::default()
        }
    }

    #[test]
    fn test_bulk_load_without_owners_activates_world() {
        let mut engine = engine();
        engine.handle_reply(AuthorityReply::StrongholdData(vec![snapshot(1, 0), snapshot(2, 0)]));
        assert_eq!(engine.host().script_events, vec![WORLD_ACTIVATION_EVENT.to_string()]);
        assert!(engine.host().requests.is_empty());
    }

    #[test]
    fn test_bulk_load_defers_activation_to_last_owner() {
        let mut engine = engine();
        engine.handle_reply(AuthorityReply::StrongholdData(vec![
            snapshot(1, 7),
            snapshot(2, 0),
            snapshot(3, 8),
        ]));
        assert!(engine.host().script_events.is_empty());
        assert_eq!(
            engine.host().requests,
            vec![
                AuthorityRequest::RequestInfo { guild_id: 7 },
                AuthorityRequest::RequestInfo { guild_id: 8 },
            ]
        );
        assert_eq!(engine.deferred_for_guild(8), 1);
        assert_eq!(engine.deferred_for_guild(7), 0);
    }

    #[test]
    fn test_load_field_chains_events_and_requests_once() {
        let mut engine = engine();
        engine.load_stronghold_field(2, 1, Some("Agit#aldeg_cas02::OnA")).unwrap();
        engine.load_stronghold_field(2, 1, Some("Agit#aldeg_cas02::OnB")).unwrap();
        assert_eq!(engine.host().requests.len(), 1);

        engine.handle_reply(AuthorityReply::StrongholdField {
            castle_id: 2,
            field: 1,
            value: 0,
        });
        assert_eq!(
            engine.host().script_events,
            vec!["Agit#aldeg_cas02::OnA".to_string(), "Agit#aldeg_cas02::OnB".to_string()]
        );
        engine.handle_reply(AuthorityReply::StrongholdField {
            castle_id: 2,
            field: 1,
            value: 0,
        });
        assert_eq!(engine.host().script_events.len(), 2);
    }

    #[test]
    fn test_unknown_field_index_is_reported() {
        let mut engine = engine();
        assert_eq!(
            engine.load_stronghold_field(1, 99, None),
            Err(GuildError::UnknownStrongholdField(99))
        );
        assert_eq!(
            engine.save_stronghold_field(9, 2, 1),
            Err(GuildError::UnknownStronghold(9))
        );
    }

    #[test]
    fn test_save_owner_unowned_refreshes_defenders_immediately() {
        let mut engine = engine();
        engine.save_stronghold_field(1, 1, 0).unwrap();
        assert!(engine.host().defender_refreshes.is_empty(), "owner did not change");

        engine.save_stronghold_field(1, StrongholdField::Economy.index(), 12).unwrap();
        assert_eq!(engine.strongholds().lookup(1).unwrap().economy, 12);
        assert_eq!(
            engine.host().requests.last(),
            Some(&AuthorityRequest::StrongholdFieldSave {
                castle_id: 1,
                field: 2,
                value: 12
            })
        );
    }

    #[test]
    fn test_siege_window_broadcasts_once() {
        let mut engine = engine();
        engine.start_siege();
        engine.start_siege();
        engine.end_siege();
        assert_eq!(
            engine.host().stronghold_broadcasts,
            vec!["::OnAgitStart".to_string(), "::OnAgitEnd".to_string()]
        );
        assert!(!engine.siege_active());
    }

    #[test]
    fn test_lost_owner_info_is_asked_for_again() {
        let mut engine = engine();
        engine.handle_reply(AuthorityReply::StrongholdData(vec![snapshot(3, 7)]));
        assert_eq!(engine.host_mut().take_requests(), vec![AuthorityRequest::RequestInfo { guild_id: 7 }]);

        // The reply never comes
        engine.tick(20_000);
        assert!(engine.host().requests.is_empty());
        engine.tick(31_000);
        assert_eq!(engine.host_mut().take_requests(), vec![AuthorityRequest::RequestInfo { guild_id: 7 }]);

        let owner = GuildMember {
            account_id: 1,
            char_id: 10,
            name: "Alpha".into(),
            ..Default::default()
        };
        engine.handle_reply(AuthorityReply::GuildInfo(Guild::founded(7, "Wolves".into(), owner, 16)));
        assert_eq!(engine.host().script_events, vec![WORLD_ACTIVATION_EVENT.to_string()]);
        assert!(!engine.is_awaiting_info(7));
    }

    #[test]
    fn test_lost_field_load_is_sent_again() {
        let mut engine = engine();
        engine.load_stronghold_field(2, 1, Some("Agit#aldeg_cas02::OnA")).unwrap();
        engine.host_mut().take_requests();

        engine.tick(10_000);
        engine.load_stronghold_field(2, 1, Some("Agit#aldeg_cas02::OnB")).unwrap();
        assert!(engine.host().requests.is_empty(), "first load still in flight");

        engine.tick(31_000);
        assert_eq!(
            engine.host_mut().take_requests(),
            vec![AuthorityRequest::StrongholdFieldLoad { castle_id: 2, field: 1 }]
        );
        assert!(engine.is_awaiting_field(2, StrongholdField::Owner));

        engine.handle_reply(AuthorityReply::StrongholdField {
            castle_id: 2,
            field: 1,
            value: 0,
        });
        assert_eq!(engine.host().script_events.len(), 2);
        assert!(!engine.is_awaiting_field(2, StrongholdField::Owner));
    }
}
