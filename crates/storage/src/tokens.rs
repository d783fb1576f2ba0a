use alloy_primitives::Address;
use sqlx::{PgConnection, Row};
use tr_types::{TokenMetadata, TokenWrapped};

use crate::{row::as_address, StorageError};

fn token_from_row(row: &sqlx::postgres::PgRow) -> Result<TokenWrapped, StorageError> {
    Ok(TokenWrapped {
        network_id: row.try_get::<i64, _>("network_id")? as u32,
        orig_net: row.try_get::<i64, _>("orig_net")? as u32,
        orig_token_addr: as_address(&row.try_get::<Vec<u8>, _>("orig_token_addr")?)?,
        wrapped_token_addr: as_address(&row.try_get::<Vec<u8>, _>("wrapped_token_addr")?)?,
        block_id: row.try_get::<i64, _>("block_id")? as u64,
        block_number: 0,
        metadata: TokenMetadata {
            name: row.try_get::<String, _>("name")?,
            symbol: row.try_get::<String, _>("symbol")?,
            decimals: row.try_get::<i16, _>("decimals")? as u8,
        },
    })
}

/// Metadata bytes of the deposit that bridged this token towards
/// `dest_net`, when one is synced.
pub async fn get_token_metadata(
    conn: &mut PgConnection,
    network_id: u32,
    dest_net: u32,
    orig_token_addr: Address,
) -> Result<Vec<u8>, StorageError> {
    let row = sqlx::query(
        "SELECT metadata FROM sync.deposit \
         WHERE network_id = $1 AND orig_addr = $2 AND dest_net = $3 AND metadata IS NOT NULL \
         LIMIT 1",
    )
    .bind(network_id as i64)
    .bind(orig_token_addr.as_slice())
    .bind(dest_net as i64)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StorageError::NotFound)?;
    Ok(row.try_get::<Vec<u8>, _>("metadata")?)
}

/// Stores a wrapped-token deployment, back-filling name/symbol/decimals
/// from the originating deposit's metadata. The deposit can be missing in
/// fast-sync mode, in which case the fields stay empty and are repaired on
/// read.
pub async fn add_token_wrapped(
    conn: &mut PgConnection,
    token: &TokenWrapped,
) -> Result<(), StorageError> {
    let metadata = match get_token_metadata(
        conn,
        token.orig_net,
        token.network_id,
        token.orig_token_addr,
    )
    .await
    {
        Ok(raw) => TokenMetadata::decode(&raw).unwrap_or_default(),
        Err(StorageError::NotFound) => TokenMetadata::default(),
        Err(err) => return Err(err),
    };
    sqlx::query(
        "INSERT INTO sync.token_wrapped (network_id, orig_net, orig_token_addr, \
         wrapped_token_addr, block_id, name, symbol, decimals) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(token.network_id as i64)
    .bind(token.orig_net as i64)
    .bind(token.orig_token_addr.as_slice())
    .bind(token.wrapped_token_addr.as_slice())
    .bind(token.block_id as i64)
    .bind(&metadata.name)
    .bind(&metadata.symbol)
    .bind(metadata.decimals as i16)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// A wrapped token by origin. Empty metadata is lazily repaired from the
/// originating deposit when it has shown up since insertion.
pub async fn get_token_wrapped(
    conn: &mut PgConnection,
    orig_net: u32,
    orig_token_addr: Address,
) -> Result<TokenWrapped, StorageError> {
    let row = sqlx::query(
        "SELECT network_id, orig_net, orig_token_addr, wrapped_token_addr, block_id, name, \
         symbol, decimals \
         FROM sync.token_wrapped WHERE orig_net = $1 AND orig_token_addr = $2",
    )
    .bind(orig_net as i64)
    .bind(orig_token_addr.as_slice())
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StorageError::NotFound)?;
    let mut token = token_from_row(&row)?;

    if token.metadata.symbol.is_empty() {
        match get_token_metadata(conn, token.orig_net, token.network_id, token.orig_token_addr)
            .await
        {
            Ok(raw) => {
                if let Some(metadata) = TokenMetadata::decode(&raw) {
                    sqlx::query(
                        "UPDATE sync.token_wrapped SET name = $3, symbol = $4, decimals = $5 \
                         WHERE orig_net = $1 AND orig_token_addr = $2",
                    )
                    .bind(orig_net as i64)
                    .bind(orig_token_addr.as_slice())
                    .bind(&metadata.name)
                    .bind(&metadata.symbol)
                    .bind(metadata.decimals as i16)
                    .execute(&mut *conn)
                    .await?;
                    token.metadata = metadata;
                }
            }
            Err(StorageError::NotFound) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(token)
}
