diesel::table! {
    chat_history (id) {
        id -> Int8,
        session_id -> Uuid,
        question -> Text,
        answer -> Text,
        source_filename -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}
