diesel::table! {
    users (id) {
        id -> Uuid,
        email -> Varchar,
        phone -> Nullable<Varchar>,
        full_name -> Nullable<Varchar>,
        password_hash -> Varchar,
        role -> Varchar,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    studios (id) {
        id -> Uuid,
        owner_id -> Uuid,
        name -> Varchar,
        description -> Nullable<Text>,
        location -> Nullable<Varchar>,
        capacity -> Nullable<Int4>,
        price_per_hour -> Numeric,
        amenities -> Nullable<Jsonb>,
        payment_type -> Varchar,
        paybill_number -> Nullable<Varchar>,
        till_number -> Nullable<Varchar>,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    bookings (id) {
        id -> Uuid,
        artist_id -> Uuid,
        studio_id -> Uuid,
        start_time -> Timestamptz,
        end_time -> Timestamptz,
        duration_minutes -> Int4,
        amount -> Numeric,
        currency -> Varchar,
        status -> Varchar,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    booking_slots (id) {
        id -> Uuid,
        booking_id -> Uuid,
        start_time -> Timestamptz,
        end_time -> Timestamptz,
    }
}

diesel::table! {
    payments (id) {
        id -> Uuid,
        booking_id -> Nullable<Uuid>,
        provider -> Varchar,
        amount -> Numeric,
        currency -> Varchar,
        status -> Varchar,
        provider_reference -> Nullable<Varchar>,
        raw_response -> Nullable<Jsonb>,
        phone_number -> Nullable<Varchar>,
        channel_number -> Nullable<Varchar>,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(studios -> users (owner_id));
diesel::joinable!(bookings -> users (artist_id));
diesel::joinable!(bookings -> studios (studio_id));
diesel::joinable!(booking_slots -> bookings (booking_id));
diesel::joinable!(payments -> bookings (booking_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    studios,
    bookings,
    booking_slots,
    payments,
);
