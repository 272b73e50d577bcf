// Esquema Diesel compartido por SQLite y Postgres.
// Tabla: delta_files (documento JSON + columnas indexadas para consultas)
diesel::table! {
    delta_files (did) {
        did -> Text,
        name -> Text,
        data_source -> Text,
        stage -> Text,
        created_ts -> BigInt,
        modified_ts -> BigInt,
        active_modified_ts -> Nullable<BigInt>,
        terminal_ts -> Nullable<BigInt>,
        content_deleted_ts -> Nullable<BigInt>,
        content_purged -> Bool,
        error_acknowledged_ts -> Nullable<BigInt>,
        total_bytes -> BigInt,
        version -> BigInt,
        document -> Text,
    }
}
