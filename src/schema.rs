table! {
    course (course_id) {
        course_id -> BigInt,
        name -> Text,
        cup -> Text,
        origin -> Text,
        image -> Nullable<Text>,
    }
}

table! {
    participation (participation_id) {
        participation_id -> BigInt,
        tournament_id -> BigInt,
        user_id -> BigInt,
        join_date -> Timestamp,
    }
}

table! {
    score (score_id) {
        score_id -> BigInt,
        participation_id -> BigInt,
        time_ms -> BigInt,
        proof_url -> Nullable<Text>,
        submitted_at -> Timestamp,
        status_id -> Integer,
    }
}

table! {
    score_status (status_id) {
        status_id -> Integer,
        name -> Text,
        description -> Nullable<Text>,
    }
}

table! {
    server (server_id) {
        server_id -> BigInt,
        name -> Text,
        prefix -> Text,
        admin_role_id -> Nullable<BigInt>,
    }
}

table! {
    tournament (tournament_id) {
        tournament_id -> BigInt,
        server_id -> BigInt,
        course_id -> BigInt,
        vehicle_class -> Text,
        start_date -> Timestamp,
        end_date -> Timestamp,
        is_active -> Bool,
        message_id -> Nullable<BigInt>,
        channel_id -> Nullable<BigInt>,
        thread_id -> Nullable<BigInt>,
        leaderboard_message_id -> Nullable<BigInt>,
        reminder_sent_at -> Nullable<Timestamp>,
    }
}

table! {
    user (user_id) {
        user_id -> BigInt,
        discord_id -> BigInt,
        username -> Text,
    }
}

joinable!(participation -> tournament (tournament_id));
joinable!(participation -> user (user_id));
joinable!(score -> participation (participation_id));
joinable!(score -> score_status (status_id));
joinable!(tournament -> course (course_id));
joinable!(tournament -> server (server_id));

allow_tables_to_appear_in_same_query!(
    course,
    participation,
    score,
    score_status,
    server,
    tournament,
    user,
);
