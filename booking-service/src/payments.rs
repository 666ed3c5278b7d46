use crate::api::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{Booking, Payment, Studio};
use crate::mpesa::StkPushRequest;
use crate::schema::{bookings, payments, studios};
use axum::extract::{Path, State};
use axum::Json;
use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{can_perform, Action, BookingStatus, PaymentChannel, PaymentStatus, Role};
use std::str::FromStr;
use tracing::{error, info, warn};
use uuid::Uuid;

const TRANSACTION_DESC: &str = "Studio booking";

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub booking_id: Option<Uuid>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InitiatePaymentResponse {
    pub message: String,
    pub checkout_request_id: String,
}

/// Resolves the channel a studio is paid through. The discriminator selects
/// which number column is meaningful; a missing number is a configuration
/// error on the studio, not a gateway fault.
fn studio_channel(studio: &Studio) -> Result<(PaymentChannel, String), ApiError> {
    let channel = PaymentChannel::from_str(&studio.payment_type).map_err(|_| {
        ApiError::Validation("Studio payment channel is not configured".to_string())
    })?;
    let number = match channel {
        PaymentChannel::Paybill => studio.paybill_number.clone(),
        PaymentChannel::Till => studio.till_number.clone(),
    };
    let number = number.ok_or_else(|| {
        ApiError::Validation(format!("Studio has no {channel} number configured"))
    })?;
    Ok((channel, number))
}

/// A settled payment is never pushed again: `completed` and `failed` are
/// written only by the gateway callback, and re-initiation would overwrite
/// the audit record of the settled charge.
fn ensure_payment_open(payment: &Payment) -> Result<(), ApiError> {
    let status = PaymentStatus::from_str(&payment.status).map_err(|_| {
        ApiError::Internal(anyhow::anyhow!(
            "payment {} carries unrecognized status {}",
            payment.id,
            payment.status
        ))
    })?;
    if status.is_terminal() {
        return Err(ApiError::Conflict(format!("Payment is already {status}")));
    }
    Ok(())
}

/// Whole-KES charge for the gateway; precision is kept in the stored amount.
fn gateway_amount(amount: &BigDecimal) -> Result<u64, ApiError> {
    amount
        .round(0)
        .to_u64()
        .ok_or_else(|| ApiError::Validation("Payment amount is not chargeable".to_string()))
}

/// POST /payments/initiate — push a charge prompt to the payer's phone and
/// move the payment to `processing`. The stored checkout reference is what
/// the asynchronous callback is correlated by.
pub async fn initiate_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<InitiatePaymentRequest>,
) -> Result<Json<InitiatePaymentResponse>, ApiError> {
    let (Some(booking_id), Some(phone_number)) = (req.booking_id, req.phone_number) else {
        return Err(ApiError::Validation(
            "Missing booking_id or phone_number".to_string(),
        ));
    };
    if !can_perform(user.role, Action::InitiatePayment) {
        return Err(ApiError::Forbidden("Forbidden: Access denied".to_string()));
    }

    let mut conn = state.pool.get().await?;
    let booking: Booking = bookings::table
        .find(booking_id)
        .first(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| ApiError::NotFound("Booking not found".to_string()))?;

    if user.role != Role::Admin && booking.artist_id != user.id {
        return Err(ApiError::Forbidden(
            "Forbidden: Not your booking".to_string(),
        ));
    }

    let payment: Payment = payments::table
        .filter(payments::booking_id.eq(Some(booking_id)))
        .first(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| ApiError::NotFound("Payment record not found".to_string()))?;
    ensure_payment_open(&payment)?;
    let studio: Studio = studios::table
        .find(booking.studio_id)
        .first(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| ApiError::NotFound("Studio not found".to_string()))?;

    let (channel, channel_number) = studio_channel(&studio)?;
    let push = StkPushRequest {
        amount: gateway_amount(&payment.amount)?,
        phone_number: phone_number.clone(),
        channel_number: channel_number.clone(),
        transaction_type: channel.transaction_type(),
        account_reference: booking.id.to_string(),
        transaction_desc: TRANSACTION_DESC.to_string(),
    };

    let outcome = state
        .mpesa
        .stk_push(&push)
        .await
        .map_err(|e| ApiError::Gateway(anyhow::Error::new(e)))?;

    diesel::update(payments::table.find(payment.id))
        .set((
            payments::raw_response.eq(Some(outcome.raw.clone())),
            payments::provider_reference.eq(Some(outcome.checkout_request_id.clone())),
            payments::phone_number.eq(Some(phone_number)),
            payments::channel_number.eq(Some(channel_number)),
            payments::status.eq(PaymentStatus::Processing.as_str()),
            payments::updated_at.eq(Some(Utc::now())),
        ))
        .execute(&mut conn)
        .await?;

    info!(payment_id = %payment.id, booking_id = %booking.id, "STK push initiated");
    Ok(Json(InitiatePaymentResponse {
        message: "STK push initiated successfully".to_string(),
        checkout_request_id: outcome.checkout_request_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: Option<String>,
    #[serde(rename = "CallbackMetadata")]
    pub metadata: Option<Value>,
}

/// Result code 0 completes the payment; any other code fails it.
fn reconcile(result_code: i64) -> PaymentStatus {
    if result_code == 0 {
        PaymentStatus::Completed
    } else {
        PaymentStatus::Failed
    }
}

/// Acknowledgement body returned to the gateway. Transport receipt is always
/// a 200; anomalies surface only as a nonzero code in the body so the
/// provider does not hammer us with retries.
#[derive(Debug, Serialize)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl CallbackAck {
    fn ok(desc: &str) -> Self {
        Self {
            result_code: 0,
            result_desc: desc.to_string(),
        }
    }

    fn anomaly(desc: &str) -> Self {
        Self {
            result_code: 1,
            result_desc: desc.to_string(),
        }
    }
}

/// POST /payments/callback — unauthenticated; the gateway is the only
/// caller. Payment is updated first and the booking confirmation rides in
/// the same transaction; the payment row is the authoritative record.
pub async fn mpesa_callback(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Json<CallbackAck> {
    let envelope: CallbackEnvelope = match serde_json::from_value(raw.clone()) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(error = %err, "malformed gateway callback");
            return Json(CallbackAck::anomaly("malformed callback body"));
        }
    };
    let stk = envelope.body.stk_callback;

    let mut conn = match state.pool.get().await {
        Ok(conn) => conn,
        Err(err) => {
            error!(error = %err, "connection pool unavailable for gateway callback");
            return Json(CallbackAck::anomaly("internal error"));
        }
    };

    let payment = payments::table
        .filter(payments::provider_reference.eq(&stk.checkout_request_id))
        .first::<Payment>(&mut conn)
        .await
        .optional();
    let payment = match payment {
        Ok(Some(payment)) => payment,
        Ok(None) => {
            warn!(
                checkout_request_id = %stk.checkout_request_id,
                "payment not found for gateway callback"
            );
            return Json(CallbackAck::anomaly("payment not found"));
        }
        Err(err) => {
            error!(error = %err, "payment lookup failed for gateway callback");
            return Json(CallbackAck::anomaly("internal error"));
        }
    };

    if let Ok(current) = PaymentStatus::from_str(&payment.status) {
        if current.is_terminal() {
            info!(
                payment_id = %payment.id,
                status = %current,
                "duplicate gateway callback ignored"
            );
            return Json(CallbackAck::ok("already processed"));
        }
    }

    let new_status = reconcile(stk.result_code);
    let payment_id = payment.id;
    let booking_id = payment.booking_id;
    let result = conn
        .transaction::<_, diesel::result::Error, _>(|conn| {
            Box::pin(async move {
                diesel::update(payments::table.find(payment_id))
                    .set((
                        payments::status.eq(new_status.as_str()),
                        payments::raw_response.eq(Some(raw)),
                        payments::updated_at.eq(Some(Utc::now())),
                    ))
                    .execute(conn)
                    .await?;

                if new_status == PaymentStatus::Completed {
                    if let Some(booking_id) = booking_id {
                        diesel::update(bookings::table.find(booking_id))
                            .set((
                                bookings::status.eq(BookingStatus::Confirmed.as_str()),
                                bookings::updated_at.eq(Some(Utc::now())),
                            ))
                            .execute(conn)
                            .await?;
                    }
                }
                Ok(())
            })
        })
        .await;

    match result {
        Ok(()) => {
            info!(
                payment_id = %payment_id,
                result_code = stk.result_code,
                status = %new_status,
                "gateway callback reconciled"
            );
            Json(CallbackAck::ok("callback received"))
        }
        Err(err) => {
            error!(error = %err, payment_id = %payment_id, "failed to record gateway callback");
            Json(CallbackAck::anomaly("failed to record callback"))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub status: String,
    pub amount: BigDecimal,
    pub booking_id: Option<Uuid>,
    pub provider_reference: Option<String>,
    pub phone_number: Option<String>,
    pub channel_number: Option<String>,
}

/// GET /payments/:id
pub async fn payment_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    _user: AuthUser,
) -> Result<Json<PaymentStatusResponse>, ApiError> {
    let mut conn = state.pool.get().await?;
    let payment: Payment = payments::table
        .find(id)
        .first(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| ApiError::NotFound("Payment not found".to_string()))?;

    Ok(Json(PaymentStatusResponse {
        status: payment.status,
        amount: payment.amount,
        booking_id: payment.booking_id,
        provider_reference: payment.provider_reference,
        phone_number: payment.phone_number,
        channel_number: payment.channel_number,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn studio(payment_type: &str, paybill: Option<&str>, till: Option<&str>) -> Studio {
        Studio {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: "Sound Lab".to_string(),
            description: None,
            location: None,
            capacity: None,
            price_per_hour: BigDecimal::from(1000),
            amenities: None,
            payment_type: payment_type.to_string(),
            paybill_number: paybill.map(str::to_string),
            till_number: till.map(str::to_string),
            created_at: None,
        }
    }

    fn payment(status: &str) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            booking_id: Some(Uuid::new_v4()),
            provider: "MPESA".to_string(),
            amount: BigDecimal::from(1500),
            currency: "KES".to_string(),
            status: status.to_string(),
            provider_reference: None,
            raw_response: None,
            phone_number: None,
            channel_number: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn reconcile_maps_result_codes() {
        assert_eq!(reconcile(0), PaymentStatus::Completed);
        assert_eq!(reconcile(1), PaymentStatus::Failed);
        assert_eq!(reconcile(1032), PaymentStatus::Failed);
    }

    #[test]
    fn settled_payment_cannot_be_reinitiated() {
        for status in ["completed", "failed"] {
            let err = ensure_payment_open(&payment(status)).unwrap_err();
            assert!(matches!(err, ApiError::Conflict(_)));
        }
    }

    #[test]
    fn open_payment_can_be_initiated() {
        assert!(ensure_payment_open(&payment("pending")).is_ok());
        assert!(ensure_payment_open(&payment("processing")).is_ok());
    }

    #[test]
    fn paybill_studio_resolves_to_paybill_number() {
        let (channel, number) = studio_channel(&studio("paybill", Some("888880"), None)).unwrap();
        assert_eq!(channel, PaymentChannel::Paybill);
        assert_eq!(number, "888880");
        assert_eq!(channel.transaction_type(), "CustomerPayBillOnline");
    }

    #[test]
    fn till_studio_resolves_to_till_number() {
        let (channel, number) = studio_channel(&studio("till", None, Some("654321"))).unwrap();
        assert_eq!(channel, PaymentChannel::Till);
        assert_eq!(number, "654321");
        assert_eq!(channel.transaction_type(), "CustomerBuyGoodsOnline");
    }

    #[test]
    fn studio_without_channel_number_is_rejected() {
        let err = studio_channel(&studio("paybill", None, Some("654321"))).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        let err = studio_channel(&studio("cash", None, None)).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn gateway_amount_rounds_to_whole_currency() {
        let amount = BigDecimal::from_str("1500.00").unwrap();
        assert_eq!(gateway_amount(&amount).unwrap(), 1500);
        let fractional = BigDecimal::from_str("1499.50").unwrap();
        assert_eq!(gateway_amount(&fractional).unwrap(), 1500);
    }

    #[test]
    fn negative_amount_is_not_chargeable() {
        let amount = BigDecimal::from(-5);
        assert!(gateway_amount(&amount).is_err());
    }

    #[test]
    fn parses_success_callback() {
        let body = json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            { "Name": "Amount", "Value": 1500.00 },
                            { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" },
                            { "Name": "PhoneNumber", "Value": 254712345678u64 }
                        ]
                    }
                }
            }
        });
        let envelope: CallbackEnvelope = serde_json::from_value(body).unwrap();
        let stk = envelope.body.stk_callback;
        assert_eq!(stk.result_code, 0);
        assert_eq!(stk.checkout_request_id, "ws_CO_191220191020363925");
        assert!(stk.metadata.is_some());
        assert_eq!(reconcile(stk.result_code), PaymentStatus::Completed);
    }

    #[test]
    fn parses_failure_callback_without_metadata() {
        let body = json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 1032,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        });
        let envelope: CallbackEnvelope = serde_json::from_value(body).unwrap();
        let stk = envelope.body.stk_callback;
        assert!(stk.metadata.is_none());
        assert_eq!(reconcile(stk.result_code), PaymentStatus::Failed);
    }

    #[test]
    fn malformed_callback_fails_to_parse() {
        let body = json!({ "Body": { "unexpected": true } });
        assert!(serde_json::from_value::<CallbackEnvelope>(body).is_err());
    }

    #[test]
    fn ack_uses_gateway_field_names() {
        let ack = serde_json::to_value(CallbackAck::ok("callback received")).unwrap();
        assert_eq!(ack.get("ResultCode").and_then(|v| v.as_i64()), Some(0));
        assert_eq!(
            ack.get("ResultDesc").and_then(|v| v.as_str()),
            Some("callback received")
        );
        let anomaly = serde_json::to_value(CallbackAck::anomaly("payment not found")).unwrap();
        assert_eq!(anomaly.get("ResultCode").and_then(|v| v.as_i64()), Some(1));
    }
}
