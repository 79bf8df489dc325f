//! Lua scripts for atomic registry writes.
//!
//! Each connection is a hash; each meeting has a set of active connection
//! IDs acting as the (MeetingId, IsActive) index. The hash and the index must
//! change together, so both writes run inside one script.

/// Upsert a connection record and maintain the active index.
///
/// The caller reads the current `MeetingId` first and passes it as ARGV[6];
/// if the hash changed in between, nothing is written and the caller retries.
///
/// Arguments:
/// - KEYS[1]: Connection hash (`connection:{id}`)
/// - KEYS[2]: Active index for the record's meeting (`meeting:{id}:connections:active`)
/// - KEYS[3]: Active index for the previous meeting (same as KEYS[2] if none)
/// - ARGV[1]: ConnectionId
/// - ARGV[2]: ParticipantId
/// - ARGV[3]: MeetingId
/// - ARGV[4]: ConnectedAt (RFC 3339)
/// - ARGV[5]: IsActive ("1" or "0")
/// - ARGV[6]: Previous MeetingId as read by the caller ("" if no record)
///
/// Returns:
/// - 1: Saved
/// - -1: MeetingId changed since it was read
pub const SAVE_CONNECTION: &str = r#"
local current_meeting = redis.call('HGET', KEYS[1], 'MeetingId') or ''
if current_meeting ~= ARGV[6] then
    return -1
end

-- Drop the connection from the previous meeting's index if the meeting changed
if current_meeting ~= '' and current_meeting ~= ARGV[3] then
    redis.call('SREM', KEYS[3], ARGV[1])
end

redis.call('HSET', KEYS[1],
    'ConnectionId', ARGV[1],
    'ParticipantId', ARGV[2],
    'MeetingId', ARGV[3],
    'ConnectedAt', ARGV[4],
    'IsActive', ARGV[5])

if ARGV[5] == '1' then
    redis.call('SADD', KEYS[2], ARGV[1])
else
    redis.call('SREM', KEYS[2], ARGV[1])
end

return 1
"#;

/// Mark a connection inactive and remove it from its meeting's index.
///
/// Arguments:
/// - KEYS[1]: Connection hash (`connection:{id}`)
/// - KEYS[2]: Active index for the meeting read by the caller
/// - ARGV[1]: ConnectionId
/// - ARGV[2]: MeetingId read by the caller
///
/// Returns:
/// - 1: Deactivated
/// - 0: No such connection
/// - -1: MeetingId changed since it was read
pub const DEACTIVATE_CONNECTION: &str = r#"
local meeting_id = redis.call('HGET', KEYS[1], 'MeetingId')
if not meeting_id then
    -- Unknown connection
    return 0
end
if meeting_id ~= ARGV[2] then
    return -1
end

redis.call('HSET', KEYS[1], 'IsActive', '0')
redis.call('SREM', KEYS[2], ARGV[1])
return 1
"#;
