use anchor_lang::prelude::Pubkey;
use anchor_spl::associated_token::get_associated_token_address;
use anchor_spl::associated_token::spl_associated_token_account::instruction::create_associated_token_account_idempotent;
use solana_sdk::compute_budget::ComputeBudgetInstruction;
use solana_sdk::instruction::{AccountMeta, Instruction};

use crate::constants::{DEPOSIT_DISCRIMINATOR, WITHDRAW_DISCRIMINATOR};
use crate::errors::PreconditionError;
use crate::state::PoolConfig;
use crate::transaction::plan::{InstructionKind, TransactionPlan};

/// Anchor instruction data: discriminator, then the two u64 arguments.
pub fn instruction_data(kind: InstructionKind, amount: u64, minimum_out: u64) -> Vec<u8> {
    let discriminator = match kind {
        InstructionKind::Deposit => DEPOSIT_DISCRIMINATOR,
        InstructionKind::Withdraw => WITHDRAW_DISCRIMINATOR,
    };
    let mut data = Vec::with_capacity(8 + 16);
    data.extend_from_slice(&discriminator);
    data.extend_from_slice(&amount.to_le_bytes());
    data.extend_from_slice(&minimum_out.to_le_bytes());
    data
}

/// Main deposit/withdraw instruction. Every supported token's vault and
/// price feed follow as remaining accounts so the program can revalue the pool.
pub fn pool_instruction(
    program_id: Pubkey,
    pool_config_address: Pubkey,
    config: &PoolConfig,
    user: Pubkey,
    plan: &TransactionPlan,
) -> Result<Instruction, PreconditionError> {
    let token = config
        .supported_token(&plan.mint)
        .ok_or(PreconditionError::UnsupportedMint(plan.mint))?;

    let mut accounts = vec![
        AccountMeta::new(user, true),
        AccountMeta::new(pool_config_address, false),
        AccountMeta::new_readonly(config.oracle_aggregator, false),
        AccountMeta::new_readonly(token.mint, false),
        AccountMeta::new_readonly(token.token_history, false),
        AccountMeta::new_readonly(token.price_feed, false),
        AccountMeta::new(token.vault, false),
        AccountMeta::new(get_associated_token_address(&user, &token.mint), false),
        AccountMeta::new(config.share_mint, false),
        AccountMeta::new(get_associated_token_address(&user, &config.share_mint), false),
        AccountMeta::new_readonly(anchor_spl::token::ID, false),
        AccountMeta::new_readonly(anchor_spl::associated_token::ID, false),
        AccountMeta::new_readonly(anchor_lang::system_program::ID, false),
    ];
    for supported in &config.supported_tokens {
        accounts.push(AccountMeta::new_readonly(supported.vault, false));
        accounts.push(AccountMeta::new_readonly(supported.price_feed, false));
    }

    Ok(Instruction {
        program_id,
        accounts,
        data: instruction_data(plan.kind, plan.amount, plan.minimum_out),
    })
}

/// Compute budget, optional destination account creation, then the pool call.
pub fn build_instructions(
    program_id: Pubkey,
    pool_config_address: Pubkey,
    config: &PoolConfig,
    user: Pubkey,
    plan: &TransactionPlan,
    compute_unit_limit: u32,
    priority_fee_micro_lamports: u64,
) -> Result<Vec<Instruction>, PreconditionError> {
    let mut instructions = vec![
        ComputeBudgetInstruction::set_compute_unit_limit(compute_unit_limit),
        ComputeBudgetInstruction::set_compute_unit_price(priority_fee_micro_lamports),
    ];
    if plan.create_destination {
        let destination_mint = match plan.kind {
            InstructionKind::Deposit => config.share_mint,
            InstructionKind::Withdraw => plan.mint,
        };
        instructions.push(create_associated_token_account_idempotent(
            &user,
            &user,
            &destination_mint,
            &anchor_spl::token::ID,
        ));
    }
    instructions.push(pool_instruction(
        program_id,
        pool_config_address,
        config,
        user,
        plan,
    )?);
    Ok(instructions)
}
