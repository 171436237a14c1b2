// Esquema Diesel para SQLite.
// Tablas: public_steps, steps, public_steps_steps, steps_elements
use diesel::allow_tables_to_appear_in_same_query;
diesel::table! {
    public_steps (id) {
        id -> BigInt,
        name -> Text,
        project_id -> BigInt,
        platform -> Integer,
    }
}
diesel::table! {
    steps (id) {
        id -> BigInt,
        parent_id -> BigInt,
        case_id -> BigInt,
        sort -> BigInt,
        platform -> Integer,
        step_type -> Text,
        text -> Text,
        content -> Text,
        error -> Integer,
        condition_type -> Integer,
        disabled -> Integer,
    }
}
diesel::table! {
    public_steps_steps (id) {
        id -> BigInt,
        public_steps_id -> BigInt,
        steps_id -> BigInt,
    }
}
diesel::table! {
    steps_elements (id) {
        id -> BigInt,
        steps_id -> BigInt,
        elements_id -> BigInt,
    }
}
diesel::joinable!(public_steps_steps -> public_steps (public_steps_id));
diesel::joinable!(public_steps_steps -> steps (steps_id));
diesel::joinable!(steps_elements -> steps (steps_id));
allow_tables_to_appear_in_same_query!(public_steps, steps, public_steps_steps, steps_elements);
