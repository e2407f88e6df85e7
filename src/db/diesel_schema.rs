// Diesel table definitions, kept in sync with db/schema.rs.

diesel::table! {
    address_options (address_id, option_id) {
        address_id -> Text,
        option_id -> Text,
    }
}

diesel::table! {
    addresses (id) {
        id -> Text,
        congregation_id -> Text,
        territory_id -> Text,
        map_id -> Text,
        floor -> Integer,
        code -> Text,
        sequence -> Integer,
        status -> Text,
        not_home_tries -> Integer,
        notes -> Nullable<Text>,
        dnc_time -> Nullable<Text>,
        updated_by -> Nullable<Text>,
        last_notes_updated -> Nullable<Text>,
        last_notes_updated_by -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    assignments (id) {
        id -> Text,
        congregation_id -> Text,
        map_id -> Text,
        user_id -> Nullable<Text>,
        publisher -> Text,
        assignment_type -> Text,
        expiry_date -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    congregations (id) {
        id -> Text,
        name -> Text,
        max_tries -> Integer,
        expiry_hours -> Nullable<Integer>,
        timezone -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    maps (id) {
        id -> Text,
        congregation_id -> Text,
        territory_id -> Text,
        code -> Text,
        description -> Text,
        map_type -> Text,
        floors -> Integer,
        coordinates -> Nullable<Text>,
        aggregates -> Nullable<Text>,
        progress -> Integer,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    options (id) {
        id -> Text,
        congregation_id -> Text,
        code -> Text,
        description -> Nullable<Text>,
        sequence -> Integer,
        is_countable -> Integer,
        is_default -> Integer,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    territories (id) {
        id -> Text,
        congregation_id -> Text,
        code -> Text,
        description -> Nullable<Text>,
        progress -> Integer,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::joinable!(address_options -> addresses (address_id));
diesel::joinable!(address_options -> options (option_id));

diesel::allow_tables_to_appear_in_same_query!(
    address_options,
    addresses,
    assignments,
    congregations,
    maps,
    options,
    territories,
);
