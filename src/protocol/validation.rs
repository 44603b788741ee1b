//! Inbound message validation.
//!
//! Invalid messages are logged and dropped by the handlers; none of these
//! checks may panic or crash a service.

use super::messages::{
    PlayerRouteAck, PlayerSlotRequest, ServerRegistrationRequest, SlotStatusUpdate,
};
use super::types::AckStatus;

fn require_non_blank(value: &str, field: &'static str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} cannot be blank"));
    }
    Ok(())
}

pub fn validate_slot_request(request: &PlayerSlotRequest) -> Result<(), String> {
    require_non_blank(&request.player_name, "playerName")?;
    require_non_blank(&request.proxy_id, "proxyId")?;
    require_non_blank(&request.family_id, "familyId")?;
    if request.request_id.is_nil() {
        return Err("requestId cannot be the nil UUID".to_string());
    }
    if request.player_id.is_nil() {
        return Err("playerId cannot be the nil UUID".to_string());
    }
    Ok(())
}

pub fn validate_route_ack(ack: &PlayerRouteAck) -> Result<(), String> {
    require_non_blank(&ack.proxy_id, "proxyId")?;
    if ack.status == AckStatus::Success {
        match (&ack.server_id, &ack.slot_id) {
            (Some(server), Some(slot)) => {
                require_non_blank(server, "serverId")?;
                require_non_blank(slot, "slotId")?;
            }
            _ => return Err("SUCCESS ack requires serverId and slotId".to_string()),
        }
    }
    Ok(())
}

pub fn validate_registration(request: &ServerRegistrationRequest) -> Result<(), String> {
    require_non_blank(&request.temp_id, "tempId")?;
    require_non_blank(&request.server_type, "type")?;
    if !request
        .server_type
        .chars()
        .all(|c| c.is_ascii_alphanumeric())
    {
        return Err("type must be alphanumeric".to_string());
    }
    if request.max_capacity == 0 {
        return Err("maxCapacity must be positive".to_string());
    }
    if request.port == 0 {
        return Err("port must be a valid TCP port".to_string());
    }
    Ok(())
}

pub fn validate_slot_update(update: &SlotStatusUpdate) -> Result<(), String> {
    require_non_blank(&update.server_id, "serverId")?;
    require_non_blank(&update.slot_suffix, "slotSuffix")?;
    if update.max_players > 0 && update.online_players > update.max_players {
        return Err(format!(
            "onlinePlayers {} exceeds maxPlayers {}",
            update.online_players, update.max_players
        ));
    }
    Ok(())
}
