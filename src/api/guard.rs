//! Tenancy guard.
//!
//! Resolves the caller against the company (and clinic) named in the path
//! before any handler touches company data:
//! unknown company or clinic is 404, a caller who is not on the company's
//! staff is 403.

use std::sync::Arc;

use ulid::Ulid;

use super::error::ApiError;
use super::AppState;
use crate::auth::{Caller, CallerContext};
use crate::engine::Engine;

/// Path ids that are not ULIDs cannot name anything.
pub fn parse_id(raw: &str, entity: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw).map_err(|_| ApiError::NotFound(format!("{entity} not found: {raw}")))
}

fn load_company(state: &AppState, company_id: &str) -> Result<Arc<Engine>, ApiError> {
    let id = parse_id(company_id, "company")?;
    state
        .tenants
        .get(id)?
        .ok_or_else(|| ApiError::NotFound(format!("company not found: {id}")))
}

fn member_context(engine: &Engine, caller: &Caller) -> Result<CallerContext, ApiError> {
    let (employee_id, role) = engine.staff_member(&caller.email).ok_or_else(|| {
        tracing::debug!(uid = %caller.uid, company_id = %engine.company_id(), "caller is not on staff");
        ApiError::Forbidden("caller is not a member of this company".into())
    })?;
    Ok(CallerContext {
        caller: caller.clone(),
        company_id: engine.company_id(),
        employee_id,
        role,
    })
}

/// Guard for company-level routes.
pub fn company(state: &AppState, caller: &Caller, company_id: &str) -> Result<(Arc<Engine>, CallerContext), ApiError> {
    let engine = load_company(state, company_id)?;
    let ctx = member_context(&engine, caller)?;
    Ok((engine, ctx))
}

/// Guard for clinic-level routes. Returns the parsed clinic id.
pub fn clinic(
    state: &AppState,
    caller: &Caller,
    company_id: &str,
    clinic_id: &str,
) -> Result<(Arc<Engine>, CallerContext, Ulid), ApiError> {
    let engine = load_company(state, company_id)?;
    let clinic = parse_id(clinic_id, "clinic")?;
    if engine.clinic(clinic).is_none() {
        return Err(ApiError::NotFound(format!("clinic not found: {clinic}")));
    }
    let ctx = member_context(&engine, caller)?;
    Ok((engine, ctx, clinic))
}

pub fn require_owner(ctx: &CallerContext) -> Result<(), ApiError> {
    if ctx.is_owner() {
        Ok(())
    } else {
        Err(ApiError::Forbidden("only the company owner may do this".into()))
    }
}
