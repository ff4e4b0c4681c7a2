use anchor_lang::prelude::*;
use anchor_lang::system_program::{self, Transfer as SystemTransfer};
use anchor_spl::associated_token::AssociatedToken;
use anchor_spl::token::{self, Mint, Token, TokenAccount, Transfer};

declare_id!("HwCwnLfBqCPodYJ8YqjyFhDNbAK9fC9RYC9kKnxyaquQ");

pub const PRESALE_SEED: &[u8] = b"PRESALE_SEED";
pub const PRESALE_VAULT: &[u8] = b"PRESALE_VAULT";
pub const BUYER_ACCOUNT: &[u8] = b"BUYER_ACCOUNT";

#[program]
pub mod token_presale {
    use super::*;

    // Create the presale record and open it for purchases
    #[allow(clippy::too_many_arguments)]
    pub fn create_and_start_presale(
        ctx: Context<CreateAndStartPresale>,
        presale_identifier: u8,
        token_mint_address: Pubkey,
        softcap_amount: u64,
        hardcap_amount: u64,
        max_token_amount_per_address: u64,
        price_per_token: u64,
        start_time: u64,
        end_time: u64,
        decimals: u8,
    ) -> Result<()> {
        require!(hardcap_amount > 0, PresaleError::InvalidCaps);
        require!(softcap_amount <= hardcap_amount, PresaleError::InvalidCaps);
        require!(start_time < end_time, PresaleError::InvalidWindow);
        require!(
            ctx.accounts.token_mint.decimals == decimals,
            PresaleError::DecimalsMismatch
        );

        // Fund the vault up to the rent-exempt floor so small purchases can land in it
        let vault_floor = Rent::get()?.minimum_balance(0);
        let vault_lamports = ctx.accounts.presale_vault.lamports();
        if vault_lamports < vault_floor {
            let cpi_accounts = SystemTransfer {
                from: ctx.accounts.authority.to_account_info(),
                to: ctx.accounts.presale_vault.to_account_info(),
            };
            let cpi_ctx =
                CpiContext::new(ctx.accounts.system_program.to_account_info(), cpi_accounts);
            system_program::transfer(cpi_ctx, vault_floor - vault_lamports)?;
        }

        let presale_info = &mut ctx.accounts.presale_info;
        presale_info.presale_identifier = presale_identifier;
        presale_info.token_mint_address = token_mint_address;
        presale_info.softcap_amount = softcap_amount;
        presale_info.hardcap_amount = hardcap_amount;
        presale_info.deposit_token_amount = 0;
        presale_info.sold_token_amount = 0;
        presale_info.received_sol_amount = 0;
        presale_info.start_time = start_time;
        presale_info.end_time = end_time;
        presale_info.max_token_amount_per_address = max_token_amount_per_address;
        presale_info.lamport_price_per_token = price_per_token;
        presale_info.decimals = decimals;
        presale_info.is_live = true;
        presale_info.authority = ctx.accounts.authority.key();
        presale_info.is_soft_capped = false;
        presale_info.is_hard_capped = false;
        presale_info.is_initialized = true;
        presale_info.bump = ctx.bumps.presale_info;
        presale_info.vault_bump = ctx.bumps.presale_vault;

        emit!(PresaleCreated {
            presale_identifier,
            token_mint_address,
            authority: presale_info.authority,
            start_time,
            end_time,
        });

        msg!(
            "Presale {} created for mint {} ({} - {})",
            presale_identifier,
            token_mint_address,
            start_time,
            end_time
        );
        Ok(())
    }

    // Authority moves sale inventory into the presale token account
    pub fn deposit_token(ctx: Context<DepositToken>, amount: u64) -> Result<()> {
        require!(amount > 0, PresaleError::ZeroAmount);

        let cpi_accounts = Transfer {
            from: ctx.accounts.from_associated_token_account.to_account_info(),
            to: ctx.accounts.to_associated_token_account.to_account_info(),
            authority: ctx.accounts.admin.to_account_info(),
        };
        let cpi_program = ctx.accounts.token_program.to_account_info();
        let cpi_ctx = CpiContext::new(cpi_program, cpi_accounts);
        token::transfer(cpi_ctx, amount)?;

        let presale_info = &mut ctx.accounts.presale_info;
        presale_info.deposit_token_amount = presale_info
            .deposit_token_amount
            .checked_add(amount)
            .ok_or(PresaleError::Overflow)?;

        emit!(TokenDeposited {
            presale_identifier: presale_info.presale_identifier,
            amount,
            deposit_token_amount: presale_info.deposit_token_amount,
        });

        msg!(
            "Deposited {} tokens, inventory now {}",
            amount,
            presale_info.deposit_token_amount
        );
        Ok(())
    }

    // Buyer pays SOL into the vault and receives tokens in the same instruction
    pub fn buy_and_claim_token(ctx: Context<BuyAndClaimToken>, token_amount: u64) -> Result<()> {
        require!(token_amount > 0, PresaleError::ZeroAmount);

        let presale_info = &ctx.accounts.presale_info;
        require!(
            presale_info.is_initialized && presale_info.is_live,
            PresaleError::PresaleNotLive
        );

        let now = Clock::get()?.unix_timestamp;
        require!(
            now >= presale_info.start_time as i64,
            PresaleError::PresaleNotStarted
        );
        require!(now < presale_info.end_time as i64, PresaleError::PresaleEnded);
        require!(
            token_amount <= presale_info.deposit_token_amount,
            PresaleError::InsufficientInventory
        );

        let sold_after = presale_info
            .sold_token_amount
            .checked_add(token_amount)
            .ok_or(PresaleError::Overflow)?;
        require!(
            sold_after <= presale_info.hardcap_amount,
            PresaleError::HardcapExceeded
        );

        let bought_after = ctx
            .accounts
            .buyer_account
            .token_amount
            .checked_add(token_amount)
            .ok_or(PresaleError::Overflow)?;
        require!(
            bought_after <= presale_info.max_token_amount_per_address,
            PresaleError::PerAddressLimitExceeded
        );

        let cost = presale_info.lamports_for(token_amount)?;

        // SOL from buyer to vault
        let cpi_accounts = SystemTransfer {
            from: ctx.accounts.buyer.to_account_info(),
            to: ctx.accounts.presale_vault.to_account_info(),
        };
        let cpi_ctx = CpiContext::new(ctx.accounts.system_program.to_account_info(), cpi_accounts);
        system_program::transfer(cpi_ctx, cost)?;

        // Tokens from presale account to buyer, signed by the presale PDA
        let identifier = [presale_info.presale_identifier];
        let bump = [presale_info.bump];
        let seeds = &[PRESALE_SEED, &identifier[..], &bump[..]];
        let signer = &[&seeds[..]];

        let cpi_accounts = Transfer {
            from: ctx.accounts.presale_token_account.to_account_info(),
            to: ctx.accounts.buyer_token_account.to_account_info(),
            authority: ctx.accounts.presale_info.to_account_info(),
        };
        let cpi_program = ctx.accounts.token_program.to_account_info();
        let cpi_ctx = CpiContext::new_with_signer(cpi_program, cpi_accounts, signer);
        token::transfer(cpi_ctx, token_amount)?;

        let buyer_account = &mut ctx.accounts.buyer_account;
        if buyer_account.buyer == Pubkey::default() {
            buyer_account.buyer = ctx.accounts.buyer.key();
            buyer_account.presale_identifier = identifier[0];
            buyer_account.bump = ctx.bumps.buyer_account;
        }
        buyer_account.token_amount = bought_after;
        buyer_account.sol_amount = buyer_account
            .sol_amount
            .checked_add(cost)
            .ok_or(PresaleError::Overflow)?;

        let presale_info = &mut ctx.accounts.presale_info;
        presale_info.sold_token_amount = sold_after;
        presale_info.deposit_token_amount = presale_info
            .deposit_token_amount
            .checked_sub(token_amount)
            .ok_or(PresaleError::Overflow)?;
        presale_info.received_sol_amount = presale_info
            .received_sol_amount
            .checked_add(cost)
            .ok_or(PresaleError::Overflow)?;
        presale_info.is_soft_capped = sold_after >= presale_info.softcap_amount;
        presale_info.is_hard_capped = sold_after >= presale_info.hardcap_amount;
        if presale_info.is_hard_capped {
            presale_info.is_live = false;
        }

        emit!(TokenPurchased {
            presale_identifier: presale_info.presale_identifier,
            buyer: ctx.accounts.buyer.key(),
            token_amount,
            sol_amount: cost,
            sold_token_amount: sold_after,
        });

        msg!(
            "Buy successful: {} tokens for {} lamports",
            token_amount,
            cost
        );
        Ok(())
    }

    // Authority pulls SOL proceeds or unsold tokens
    pub fn withdraw(ctx: Context<Withdraw>, amount: u64, withdraw_type: WithdrawType) -> Result<()> {
        require!(amount > 0, PresaleError::ZeroAmount);

        let identifier = [ctx.accounts.presale_info.presale_identifier];

        match withdraw_type {
            WithdrawType::Sol => {
                let floor = Rent::get()?.minimum_balance(0);
                let available = ctx.accounts.presale_vault.lamports().saturating_sub(floor);
                require!(amount <= available, PresaleError::InsufficientVaultFunds);

                let bump = [ctx.accounts.presale_info.vault_bump];
                let seeds = &[PRESALE_VAULT, &identifier[..], &bump[..]];
                let signer = &[&seeds[..]];

                let cpi_accounts = SystemTransfer {
                    from: ctx.accounts.presale_vault.to_account_info(),
                    to: ctx.accounts.admin.to_account_info(),
                };
                let cpi_ctx = CpiContext::new_with_signer(
                    ctx.accounts.system_program.to_account_info(),
                    cpi_accounts,
                    signer,
                );
                system_program::transfer(cpi_ctx, amount)?;
            }
            WithdrawType::Token => {
                require!(
                    amount <= ctx.accounts.presale_token_account.amount,
                    PresaleError::InsufficientInventory
                );

                let bump = [ctx.accounts.presale_info.bump];
                let seeds = &[PRESALE_SEED, &identifier[..], &bump[..]];
                let signer = &[&seeds[..]];

                let cpi_accounts = Transfer {
                    from: ctx.accounts.presale_token_account.to_account_info(),
                    to: ctx.accounts.admin_token_account.to_account_info(),
                    authority: ctx.accounts.presale_info.to_account_info(),
                };
                let cpi_program = ctx.accounts.token_program.to_account_info();
                let cpi_ctx = CpiContext::new_with_signer(cpi_program, cpi_accounts, signer);
                token::transfer(cpi_ctx, amount)?;

                let presale_info = &mut ctx.accounts.presale_info;
                presale_info.deposit_token_amount =
                    presale_info.deposit_token_amount.saturating_sub(amount);
            }
        }

        emit!(Withdrawn {
            presale_identifier: identifier[0],
            amount,
            withdraw_type,
        });

        msg!("Withdrew {} ({:?}) to {}", amount, withdraw_type, ctx.accounts.admin.key());
        Ok(())
    }
}

// Account Structures

#[derive(Accounts)]
#[instruction(presale_identifier: u8, token_mint_address: Pubkey)]
pub struct CreateAndStartPresale<'info> {
    #[account(
        init,
        payer = authority,
        space = 8 + PresaleInfo::LEN,
        seeds = [PRESALE_SEED, presale_identifier.to_le_bytes().as_ref()],
        bump
    )]
    pub presale_info: Account<'info, PresaleInfo>,

    #[account(
        mut,
        seeds = [PRESALE_VAULT, presale_identifier.to_le_bytes().as_ref()],
        bump
    )]
    pub presale_vault: SystemAccount<'info>,

    #[account(
        constraint = token_mint.key() == token_mint_address @ PresaleError::MintMismatch
    )]
    pub token_mint: Account<'info, Mint>,

    #[account(mut)]
    pub authority: Signer<'info>,

    pub system_program: Program<'info, System>,
    pub token_program: Program<'info, Token>,
    pub rent: Sysvar<'info, Rent>,
}

#[derive(Accounts)]
pub struct DepositToken<'info> {
    #[account(
        mut,
        seeds = [PRESALE_SEED, presale_info.presale_identifier.to_le_bytes().as_ref()],
        bump = presale_info.bump,
        constraint = presale_info.authority == admin.key() @ PresaleError::Unauthorized
    )]
    pub presale_info: Account<'info, PresaleInfo>,

    #[account(
        address = presale_info.token_mint_address @ PresaleError::MintMismatch
    )]
    pub mint_account: Account<'info, Mint>,

    #[account(
        mut,
        associated_token::mint = mint_account,
        associated_token::authority = admin,
    )]
    pub from_associated_token_account: Account<'info, TokenAccount>,

    #[account(
        init_if_needed,
        payer = admin,
        associated_token::mint = mint_account,
        associated_token::authority = presale_info,
    )]
    pub to_associated_token_account: Account<'info, TokenAccount>,

    #[account(mut)]
    pub admin: Signer<'info>,

    pub rent: Sysvar<'info, Rent>,
    pub system_program: Program<'info, System>,
    pub token_program: Program<'info, Token>,
    pub associated_token_program: Program<'info, AssociatedToken>,
}

#[derive(Accounts)]
pub struct BuyAndClaimToken<'info> {
    #[account(
        mut,
        seeds = [PRESALE_SEED, presale_info.presale_identifier.to_le_bytes().as_ref()],
        bump = presale_info.bump
    )]
    pub presale_info: Account<'info, PresaleInfo>,

    #[account(
        address = presale_info.token_mint_address @ PresaleError::MintMismatch
    )]
    pub token_mint: Account<'info, Mint>,

    #[account(
        init_if_needed,
        payer = buyer,
        associated_token::mint = token_mint,
        associated_token::authority = buyer,
    )]
    pub buyer_token_account: Account<'info, TokenAccount>,

    #[account(
        mut,
        associated_token::mint = token_mint,
        associated_token::authority = presale_info,
    )]
    pub presale_token_account: Account<'info, TokenAccount>,

    #[account(
        mut,
        seeds = [PRESALE_VAULT, presale_info.presale_identifier.to_le_bytes().as_ref()],
        bump = presale_info.vault_bump
    )]
    pub presale_vault: SystemAccount<'info>,

    #[account(
        init_if_needed,
        payer = buyer,
        space = 8 + BuyerAccount::LEN,
        seeds = [
            BUYER_ACCOUNT,
            presale_info.presale_identifier.to_le_bytes().as_ref(),
            buyer.key().as_ref()
        ],
        bump
    )]
    pub buyer_account: Account<'info, BuyerAccount>,

    #[account(mut)]
    pub buyer: Signer<'info>,

    pub system_program: Program<'info, System>,
    pub token_program: Program<'info, Token>,
    pub associated_token_program: Program<'info, AssociatedToken>,
}

#[derive(Accounts)]
pub struct Withdraw<'info> {
    #[account(
        mut,
        seeds = [PRESALE_SEED, presale_info.presale_identifier.to_le_bytes().as_ref()],
        bump = presale_info.bump,
        constraint = presale_info.authority == admin.key() @ PresaleError::Unauthorized
    )]
    pub presale_info: Account<'info, PresaleInfo>,

    #[account(
        mut,
        seeds = [PRESALE_VAULT, presale_info.presale_identifier.to_le_bytes().as_ref()],
        bump = presale_info.vault_bump
    )]
    pub presale_vault: SystemAccount<'info>,

    #[account(mut)]
    pub admin: Signer<'info>,

    #[account(
        address = presale_info.token_mint_address @ PresaleError::MintMismatch
    )]
    pub token_mint: Account<'info, Mint>,

    #[account(
        mut,
        associated_token::mint = token_mint,
        associated_token::authority = presale_info,
    )]
    pub presale_token_account: Account<'info, TokenAccount>,

    #[account(
        init_if_needed,
        payer = admin,
        associated_token::mint = token_mint,
        associated_token::authority = admin,
    )]
    pub admin_token_account: Account<'info, TokenAccount>,

    pub system_program: Program<'info, System>,
    pub token_program: Program<'info, Token>,
    pub associated_token_program: Program<'info, AssociatedToken>,
}

// State Structures

#[account]
#[derive(Debug, PartialEq, Eq)]
pub struct PresaleInfo {
    pub presale_identifier: u8,
    pub token_mint_address: Pubkey,
    pub softcap_amount: u64,
    pub hardcap_amount: u64,
    pub deposit_token_amount: u64, // unsold inventory held by the presale token account
    pub sold_token_amount: u64,
    pub received_sol_amount: u64, // lamports
    pub start_time: u64,
    pub end_time: u64,
    pub max_token_amount_per_address: u64,
    pub lamport_price_per_token: u64, // lamports per whole token
    pub decimals: u8,
    pub is_live: bool,
    pub authority: Pubkey,
    pub is_soft_capped: bool,
    pub is_hard_capped: bool,
    pub is_initialized: bool,
    pub bump: u8,
    pub vault_bump: u8,
}

impl PresaleInfo {
    pub const LEN: usize = 1 + 32 + 8 * 10 + 1 + 1 + 32 + 1 + 1 + 1 + 1 + 1;

    /// Lamports owed for `token_amount` base units at the stored per-token price.
    pub fn lamports_for(&self, token_amount: u64) -> Result<u64> {
        let scale = 10u128
            .checked_pow(self.decimals as u32)
            .ok_or(PresaleError::Overflow)?;
        let cost = (token_amount as u128)
            .checked_mul(self.lamport_price_per_token as u128)
            .ok_or(PresaleError::Overflow)?
            / scale;
        u64::try_from(cost).map_err(|_| error!(PresaleError::Overflow))
    }
}

#[account]
#[derive(Debug, PartialEq, Eq)]
pub struct BuyerAccount {
    pub buyer: Pubkey,
    pub presale_identifier: u8,
    pub token_amount: u64, // cumulative base units
    pub sol_amount: u64,   // cumulative lamports
    pub bump: u8,
}

impl BuyerAccount {
    pub const LEN: usize = 32 + 1 + 8 + 8 + 1;
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum WithdrawType {
    Sol,
    Token,
}

// Events

#[event]
pub struct PresaleCreated {
    pub presale_identifier: u8,
    pub token_mint_address: Pubkey,
    pub authority: Pubkey,
    pub start_time: u64,
    pub end_time: u64,
}

#[event]
pub struct TokenDeposited {
    pub presale_identifier: u8,
    pub amount: u64,
    pub deposit_token_amount: u64,
}

#[event]
pub struct TokenPurchased {
    pub presale_identifier: u8,
    pub buyer: Pubkey,
    pub token_amount: u64,
    pub sol_amount: u64,
    pub sold_token_amount: u64,
}

#[event]
pub struct Withdrawn {
    pub presale_identifier: u8,
    pub amount: u64,
    pub withdraw_type: WithdrawType,
}

// Error Codes

#[error_code]
pub enum PresaleError {
    #[msg("Unauthorized: only the presale authority can perform this action")]
    Unauthorized,
    #[msg("Softcap must not exceed a non-zero hardcap")]
    InvalidCaps,
    #[msg("Start time must be before end time")]
    InvalidWindow,
    #[msg("Mint decimals do not match")]
    DecimalsMismatch,
    #[msg("Token mint does not match the presale")]
    MintMismatch,
    #[msg("Presale is not live")]
    PresaleNotLive,
    #[msg("Presale has not started")]
    PresaleNotStarted,
    #[msg("Presale has ended")]
    PresaleEnded,
    #[msg("Amount must be greater than 0")]
    ZeroAmount,
    #[msg("Not enough deposited tokens")]
    InsufficientInventory,
    #[msg("Purchase would exceed the hardcap")]
    HardcapExceeded,
    #[msg("Purchase would exceed the per-address limit")]
    PerAddressLimitExceeded,
    #[msg("Not enough SOL in the vault")]
    InsufficientVaultFunds,
    #[msg("Arithmetic overflow")]
    Overflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presale(decimals: u8, price: u64) -> PresaleInfo {
        PresaleInfo {
            presale_identifier: 1,
            token_mint_address: Pubkey::new_unique(),
            softcap_amount: 100,
            hardcap_amount: 1_000,
            deposit_token_amount: 0,
            sold_token_amount: 0,
            received_sol_amount: 0,
            start_time: 50,
            end_time: 150,
            max_token_amount_per_address: 500,
            lamport_price_per_token: price,
            decimals,
            is_live: true,
            authority: Pubkey::new_unique(),
            is_soft_capped: false,
            is_hard_capped: false,
            is_initialized: true,
            bump: 255,
            vault_bump: 254,
        }
    }

    #[test]
    fn cost_scales_by_decimals() {
        let info = presale(6, 2_000_000);
        // 10 whole tokens at 0.002 SOL
        assert_eq!(info.lamports_for(10_000_000).unwrap(), 20_000_000);
        // single base unit
        assert_eq!(info.lamports_for(1).unwrap(), 2);
        assert_eq!(presale(6, 999_999).lamports_for(1).unwrap(), 0);
    }

    #[test]
    fn cost_overflow_is_reported() {
        let info = presale(0, u64::MAX);
        assert!(info.lamports_for(u64::MAX).is_err());
    }

    #[test]
    fn account_len_matches_serialized_size() {
        let mut buf = Vec::new();
        presale(6, 1).serialize(&mut buf).unwrap();
        assert_eq!(buf.len(), PresaleInfo::LEN);

        let buyer = BuyerAccount {
            buyer: Pubkey::new_unique(),
            presale_identifier: 1,
            token_amount: 1,
            sol_amount: 1,
            bump: 1,
        };
        let mut buf = Vec::new();
        buyer.serialize(&mut buf).unwrap();
        assert_eq!(buf.len(), BuyerAccount::LEN);
    }
}
