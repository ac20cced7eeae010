// SQLite schema definitions. Chat and message ids are 64-bit (Telegram
// channel ids exceed i32), so id columns map to BigInt.

diesel::table! {
    channel_mappings (id) {
        id -> BigInt,
        user_id -> BigInt,
        telegram_account_id -> Nullable<BigInt>,
        source_chat_id -> BigInt,
        dest_chat_id -> BigInt,
        source_chat_title -> Nullable<Text>,
        dest_chat_title -> Nullable<Text>,
        enabled -> Bool,
        created_at -> Text,
    }
}

diesel::table! {
    mapping_filters (id) {
        id -> BigInt,
        mapping_id -> BigInt,
        include_text -> Nullable<Text>,
        exclude_text -> Nullable<Text>,
        media_types -> Nullable<Text>,
        regex_pattern -> Nullable<Text>,
    }
}

diesel::table! {
    mapping_transforms (id) {
        id -> BigInt,
        mapping_id -> BigInt,
        rule_type -> Text,
        find_text -> Nullable<Text>,
        replace_text -> Nullable<Text>,
        regex_pattern -> Nullable<Text>,
        regex_flags -> Nullable<Text>,
        replacement_media_asset_path -> Nullable<Text>,
        apply_to_media_types -> Nullable<Text>,
        enabled -> Bool,
        priority -> BigInt,
    }
}

diesel::table! {
    schedules (id) {
        id -> BigInt,
        user_id -> BigInt,
        mapping_id -> Nullable<BigInt>,
        mon_start_utc -> Nullable<Text>,
        mon_end_utc -> Nullable<Text>,
        tue_start_utc -> Nullable<Text>,
        tue_end_utc -> Nullable<Text>,
        wed_start_utc -> Nullable<Text>,
        wed_end_utc -> Nullable<Text>,
        thu_start_utc -> Nullable<Text>,
        thu_end_utc -> Nullable<Text>,
        fri_start_utc -> Nullable<Text>,
        fri_end_utc -> Nullable<Text>,
        sat_start_utc -> Nullable<Text>,
        sat_end_utc -> Nullable<Text>,
        sun_start_utc -> Nullable<Text>,
        sun_end_utc -> Nullable<Text>,
    }
}

diesel::table! {
    dest_message_index (user_id, source_chat_id, source_msg_id, dest_chat_id) {
        user_id -> BigInt,
        source_chat_id -> BigInt,
        source_msg_id -> BigInt,
        dest_chat_id -> BigInt,
        dest_msg_id -> BigInt,
    }
}

diesel::table! {
    worker_registry (worker_id) {
        worker_id -> Text,
        user_id -> BigInt,
        account_id -> BigInt,
        session_path -> Text,
        pid -> Integer,
        created_at -> Text,
    }
}

diesel::table! {
    message_logs (id) {
        id -> BigInt,
        user_id -> BigInt,
        source_chat_id -> BigInt,
        source_msg_id -> BigInt,
        dest_chat_id -> BigInt,
        dest_msg_id -> BigInt,
        source_chat_title -> Text,
        dest_chat_title -> Text,
        timestamp -> Text,
        status -> Text,
    }
}

diesel::table! {
    telegram_accounts (id) {
        id -> BigInt,
        user_id -> BigInt,
        kind -> Text,
        session_path -> Nullable<Text>,
        status -> Text,
    }
}
