//! Migration to create the product_mappings table.
//!
//! Links a local product to its listing on a channel. Natural key is
//! (connection_id, channel_product_id, channel_variant_id); channels
//! without variants store an empty string variant id.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ProductMappings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProductMappings::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ProductMappings::SellerId).uuid().not_null())
                    .col(
                        ColumnDef::new(ProductMappings::ConnectionId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ProductMappings::ProductId).uuid().not_null())
                    .col(
                        ColumnDef::new(ProductMappings::ChannelProductId)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProductMappings::ChannelVariantId)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(ProductMappings::ChannelSku).text().null())
                    .col(
                        ColumnDef::new(ProductMappings::PriceMultiplier)
                            .double()
                            .not_null()
                            .default(1.0),
                    )
                    .col(
                        ColumnDef::new(ProductMappings::PriceOffset)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(ProductMappings::SyncPrice)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(ProductMappings::SyncInventory)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(ProductMappings::LastPrice).text().null())
                    .col(ColumnDef::new(ProductMappings::LastStock).integer().null())
                    .col(
                        ColumnDef::new(ProductMappings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ProductMappings::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_product_mappings_connection_id")
                            .from(ProductMappings::Table, ProductMappings::ConnectionId)
                            .to(ChannelConnections::Table, ChannelConnections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_product_mappings_natural_key")
                    .table(ProductMappings::Table)
                    .col(ProductMappings::ConnectionId)
                    .col(ProductMappings::ChannelProductId)
                    .col(ProductMappings::ChannelVariantId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_product_mappings_product_id")
                    .table(ProductMappings::Table)
                    .col(ProductMappings::ProductId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_product_mappings_natural_key")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_product_mappings_product_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ProductMappings::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ProductMappings {
    Table,
    Id,
    SellerId,
    ConnectionId,
    ProductId,
    ChannelProductId,
    ChannelVariantId,
    ChannelSku,
    PriceMultiplier,
    PriceOffset,
    SyncPrice,
    SyncInventory,
    LastPrice,
    LastStock,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum ChannelConnections {
    Table,
    Id,
}
